use darling::Error;
use darling::ast::NestedMeta;
use quote::quote;
use syn::{Data, DeriveInput, Fields, ItemStruct, parse_macro_input};

use proc_macro::TokenStream;

/// GUID tail shared by the Wave64 chunk identifiers that start with a
/// four-character code.
const W64_GUID_TAIL: [u8; 12] = [
    0xF3, 0xAC, 0xD3, 0x11, 0x8C, 0xD1, 0x00, 0xC0, 0x4F, 0x8E, 0xDB, 0x8A,
];

/// Serialises every field in declaration order, without implicit padding.
/// Layout padding must be spelled out as byte-array fields.
#[proc_macro_derive(ToBytes)]
pub fn derive_to_bytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let fields: Vec<syn::Member> = match input.data {
        Data::Struct(ref s) => match s.fields {
            Fields::Named(ref nf) => nf
                .named
                .iter()
                .filter_map(|f| f.ident.clone())
                .map(syn::Member::from)
                .collect(),
            Fields::Unnamed(ref uf) => uf
                .unnamed
                .iter()
                .enumerate()
                .map(|(i, _)| syn::Index::from(i).into())
                .collect(),
            Fields::Unit => Vec::new(),
        },
        _ => {
            return TokenStream::from(
                syn::Error::new_spanned(&name, "ToBytes can only be derived for structs")
                    .to_compile_error(),
            );
        }
    };

    let expanded = quote! {
        impl crate::byteorder::WriteBytesBe for #name {
            fn write_be(&self, dst: &mut Vec<u8>) {
                #( crate::byteorder::WriteBytesBe::write_be(&self.#fields, dst); )*
            }
        }

        impl crate::byteorder::WriteBytesLe for #name {
            fn write_le(&self, dst: &mut Vec<u8>) {
                #( crate::byteorder::WriteBytesLe::write_le(&self.#fields, dst); )*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Implements `W64Chunk` for a struct serialised little-endian, e.g.
/// `#[w64_chunk(b"fmt ")]`.
#[proc_macro_attribute]
pub fn w64_chunk(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match NestedMeta::parse_meta_list(attr.into()) {
        Ok(v) => v,
        Err(e) => {
            return TokenStream::from(Error::from(e).write_errors());
        }
    };

    let Some(first) = args.first() else {
        return TokenStream::from(
            Error::custom("w64_chunk expects a four-character code, e.g. b\"fmt \"").write_errors(),
        );
    };

    let code = match first {
        NestedMeta::Lit(syn::Lit::ByteStr(bs)) => bs.value(),
        _ => {
            return TokenStream::from(
                syn::Error::new_spanned(first, "w64_chunk expects a byte string, e.g. b\"fmt \"")
                    .to_compile_error(),
            );
        }
    };

    if code.len() != 4 {
        return TokenStream::from(
            syn::Error::new_spanned(first, "w64_chunk expects 4 bytes").to_compile_error(),
        );
    }
    let guid = code.iter().chain(W64_GUID_TAIL.iter()).copied();
    let guid_tokens = quote! {[#(#guid),*]};

    let input = parse_macro_input!(item as ItemStruct);
    let name = &input.ident;

    let expanded = quote! {
        #input

        impl W64Chunk for #name {
            fn chunk_guid(&self) -> &[u8; 16] {
                const GUID: [u8; 16] = #guid_tokens;
                &GUID
            }

            fn chunk_data(&self) -> Vec<u8> {
                let mut vec = Vec::new();
                self.write_le(&mut vec);
                vec
            }
        }
    };
    TokenStream::from(expanded)
}
