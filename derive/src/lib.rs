//! `#[derive(Reflect)]` codegen (spec §3): expands a named-field struct into
//! a registered [`structsync::TypeSchema`](../structsync/struct.TypeSchema.html)
//! plus `to_value`/`from_value` conversions, reading per-field
//! `#[reflect(ignore|readonly|atomic|key)]` attributes.
//!
//! Grounded on `calimero-network-core`'s `abi-macros` crate (thin
//! `proc_macro_derive` entry point dispatching into a module that walks
//! `syn::Data::Struct` fields and builds a `quote!`-based `impl`).

use heck::MixedCase;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Meta, NestedMeta};

#[derive(Default)]
struct FieldAttrs {
    ignore: bool,
    readonly: bool,
    atomic: bool,
    key: bool,
}

fn parse_field_attrs(attrs: &[syn::Attribute]) -> FieldAttrs {
    let mut out = FieldAttrs::default();
    for attr in attrs {
        if !attr.path.is_ident("reflect") {
            continue;
        }
        let Ok(Meta::List(list)) = attr.parse_meta() else { continue };
        for nested in list.nested {
            if let NestedMeta::Meta(Meta::Path(path)) = nested {
                if path.is_ident("ignore") {
                    out.ignore = true;
                } else if path.is_ident("readonly") {
                    out.readonly = true;
                } else if path.is_ident("atomic") {
                    out.atomic = true;
                } else if path.is_ident("key") {
                    out.key = true;
                }
            }
        }
    }
    out
}

#[proc_macro_derive(Reflect, attributes(reflect))]
pub fn derive_reflect(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(name, "Reflect can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(name, "Reflect requires named fields"));
    };

    let type_name_lit = {
        let name_str = name.to_string();
        quote! { concat!(module_path!(), "::", #name_str) }
    };

    let mut field_schemas = Vec::new();
    let mut to_value_arms = Vec::new();
    let mut from_value_arms = Vec::new();

    for (idx, field) in fields.named.iter().enumerate() {
        let ident = field.ident.as_ref().expect("named field");
        let attrs = parse_field_attrs(&field.attrs);
        let name_lit = ident.to_string();
        let wire_name_lit = name_lit.to_mixed_case();
        let ignore = attrs.ignore;
        let readonly = attrs.readonly;
        let atomic = attrs.atomic;
        let key = attrs.key;

        field_schemas.push(quote! {
            ::structsync::FieldSchema {
                name: #name_lit,
                wire_name: #wire_name_lit,
                flags: ::structsync::FieldFlags {
                    ignore: #ignore,
                    readonly: #readonly,
                    atomic: #atomic,
                    key: #key,
                },
            }
        });

        to_value_arms.push(quote! {
            (#idx, ::structsync::Reflect::to_value(&self.#ident))
        });

        from_value_arms.push(quote! {
            #ident: {
                let __v = __s.field(#idx).cloned().ok_or_else(|| ::structsync::SchemaError::UnknownField {
                    type_name: __type_name,
                    field: #name_lit.to_string(),
                })?;
                ::structsync::Reflect::from_value(__v)?
            }
        });
    }

    let field_count = field_schemas.len();

    Ok(quote! {
        impl ::structsync::Reflect for #name {
            fn type_name() -> &'static str {
                #type_name_lit
            }

            fn schema() -> Option<&'static ::structsync::TypeSchema> {
                static FIELDS: [::structsync::FieldSchema; #field_count] = [#(#field_schemas),*];
                static SCHEMA: ::structsync::TypeSchema = ::structsync::TypeSchema {
                    type_name: #type_name_lit,
                    fields: &FIELDS,
                };
                Some(::structsync::register_schema(&SCHEMA))
            }

            fn to_value(&self) -> ::structsync::Value {
                #name::schema();
                ::structsync::Value::Struct(::structsync::StructValue {
                    type_name: #type_name_lit,
                    fields: vec![#(#to_value_arms),*],
                })
            }

            fn from_value(value: ::structsync::Value) -> ::std::result::Result<Self, ::structsync::SchemaError> {
                let __type_name = #type_name_lit;
                let __s = value.into_struct(__type_name)?;
                Ok(#name {
                    #(#from_value_arms),*
                })
            }
        }
    })
}
