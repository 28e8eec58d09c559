// Adapted from `validator_derive` (https://github.com/Keats/validator).
//
// See LICENSE for details.

#![recursion_limit = "128"]

use proc_macro::TokenStream;
use quote::quote;

#[proc_macro_derive(Validate, attributes(gltf))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    expand(&syn::parse_macro_input!(input as syn::DeriveInput)).into()
}

fn expand(ast: &syn::DeriveInput) -> proc_macro2::TokenStream {
    use inflections::Inflect;

    let mut hook = quote! {};
    for attr in &ast.attrs {
        if attr.path().is_ident("gltf") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("validate_hook") {
                    let expr: syn::LitStr = meta.value()?.parse()?;
                    let hook_fn =
                        syn::Ident::new(&expr.value(), proc_macro2::Span::call_site());
                    hook = quote! {
                        #hook_fn(self, _root, _path.clone(), _report);
                    };
                    Ok(())
                } else {
                    Err(meta.error("ufg-derive: unrecognized attribute"))
                }
            })
            .expect("failed to parse attribute");
        }
    }

    let ident = &ast.ident;
    let validations: Vec<proc_macro2::TokenStream> = match &ast.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(fields) => fields
                .named
                .iter()
                .map(|f| f.ident.as_ref().unwrap())
                .map(|ident| {
                    let field = ident.to_string().to_camel_case();
                    quote!(
                        self.#ident.validate(
                            _root,
                            || _path().field(#field),
                            _report,
                        )
                    )
                })
                .collect(),
            // Newtype wrappers validate their contents at the same path.
            syn::Fields::Unnamed(fields) => (0..fields.unnamed.len())
                .map(|index| {
                    let index = syn::Index::from(index);
                    quote!(
                        self.#index.validate(_root, _path.clone(), _report)
                    )
                })
                .collect(),
            syn::Fields::Unit => Vec::new(),
        },
        _ => panic!("#[derive(Validate)] only works on `struct`s"),
    };
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    quote!(
        impl #impl_generics crate::validation::Validate
            for #ident #ty_generics #where_clause
        {
            fn validate<P, R>(&self, _root: &crate::Root, _path: P, _report: &mut R)
            where
                P: Fn() -> crate::Path + Clone,
                R: FnMut(&dyn Fn() -> crate::Path, crate::validation::Error),
            {
                #(
                    #validations;
                )*
                #hook
            }
        }
    )
}
