//! Macros to `derive` the `alfen-modbus` register block trait

use proc_macro::TokenStream;
use quote::quote;

mod config;
mod entry;
mod mapping;
mod utils;

/// Derive macro to implement `alfen_modbus::codec::RegisterBlock`.
///
/// The struct carries `#[modbus(addr = .., cnt = ..)]` naming the first holding register
/// of the block and its length. Every decoded field carries `#[modbus(offset = .., ty = ..)]`
/// where `offset` is relative to `addr` and `ty` is one of `"u16"`, `"u32"`, `"u64"`,
/// `"i16"`, `"i32"`, `"i64"`, `"f32"`, `"f64"` or `"str(size)"`.
/// Float registers decode into `f64` fields rounded to 2 decimals; fields without
/// the attribute are left at their default value.
#[proc_macro_derive(RegisterBlock, attributes(modbus))]
pub fn derive_register_block(input: TokenStream) -> TokenStream {
    let ast = syn::parse_macro_input!(input as syn::DeriveInput);

    let name = &ast.ident;

    let block_config = config::Config::new(&ast);
    let addr = block_config.addr;
    let cnt = block_config.cnt;

    let mapping = mapping::Mapping::new(&ast);
    mapping.validate(cnt);

    let field_name = mapping.field_name_vec();
    let offset = mapping.offset_vec();
    let decode = mapping.decode_vec();
    let encode = mapping.encode_vec();
    let unmapped = mapping.unmapped_vec();

    let tokens = quote! {
        impl alfen_modbus::codec::RegisterBlock for #name {
            const ADDRESS: alfen_modbus::codec::Address = #addr;
            const COUNT: alfen_modbus::codec::Quantity = #cnt;

            fn decode(words: &[alfen_modbus::codec::Word]) -> ::core::result::Result<Self, alfen_modbus::codec::CodecError> {
                if words.len() < #cnt as usize {
                    return Err(alfen_modbus::codec::CodecError::OutOfBounds {
                        offset: 0,
                        count: #cnt,
                        len: words.len(),
                    });
                }
                Ok(Self {
                    #(
                        #field_name: #decode,
                    )*
                    #(
                        #unmapped: ::core::default::Default::default(),
                    )*
                })
            }

            fn encode(&self) -> Vec<alfen_modbus::codec::Word> {
                let mut words: Vec<alfen_modbus::codec::Word> = vec![0; #cnt as usize];
                #(
                    let field_words: Vec<alfen_modbus::codec::Word> = #encode;
                    let start = #offset as usize;
                    words[start..start + field_words.len()].copy_from_slice(&field_words);
                )*
                words
            }
        }
    };

    tokens.into()
}
