use crate::utils::{find_int, find_str, get_punctuated, panic_no_key, parse_u16};
use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;
use syn::Field;

#[derive(Debug, Clone)]
/// Single field of a register block. Parsed from field attributes and to be used in proc macros
pub struct Entry {
    pub field_name: String,
    pub offset: Quantity,
    pub ty: DataType,
}

pub type Address = u16;
pub type Quantity = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U16,
    U32,
    U64,
    I16,
    I32,
    I64,
    F32,
    F64,
    Str(Quantity),
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "u16" => DataType::U16,
            "u32" => DataType::U32,
            "u64" => DataType::U64,
            "i16" => DataType::I16,
            "i32" => DataType::I32,
            "i64" => DataType::I64,
            "f32" => DataType::F32,
            "f64" => DataType::F64,
            s if s.starts_with("str(") && s.ends_with(')') => {
                let size = s["str(".len()..s.len() - 1].parse::<Quantity>().unwrap_or_else(
                    |_| panic!("String `ty` variant \"{s}\" has invalid size argument.")
                );
                if size == 0 {
                    panic!("String `ty` variant \"{s}\" must span at least one register.");
                }
                DataType::Str(size)
            },
            s => panic!("Invalid `ty` variant \"{s}\". Use one of \"u16\", \"u32\", \"u64\", \"i16\", \"i32\", \"i64\", \"f32\", \"f64\" or \"str(size)\"."),
        }
    }
}

impl DataType {
    pub fn word_size(&self) -> Quantity {
        match self {
            DataType::U16 | DataType::I16 => 1,
            DataType::U32 | DataType::I32 | DataType::F32 => 2,
            DataType::U64 | DataType::I64 | DataType::F64 => 4,
            &DataType::Str(size) => size,
        }
    }

    fn primitive(&self) -> Option<Ident> {
        let ty = match self {
            DataType::U16 => "u16",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::Str(_) => return None,
        };
        Some(Ident::new(ty, Span::call_site()))
    }
}

impl From<Field> for Entry {
    fn from(value: Field) -> Self {
        let field_name = value
            .ident
            .unwrap_or_else(|| panic!("Unexpected unnamed struct field."))
            .to_string();

        let attr = value
            .attrs
            .iter()
            .find(|attr| attr.path().is_ident("modbus"))
            .unwrap_or_else(|| {
                panic!("Unexpected missing attribute `modbus` for `{field_name}` field.")
            })
            .clone();
        let punctuated = get_punctuated(&attr, &field_name);

        let offset = find_int(&punctuated, "offset", &field_name)
            .map(|lit_int| parse_u16(&lit_int, "offset", &field_name))
            .unwrap_or_else(|| panic_no_key("offset", &field_name));
        let ty = find_str(&punctuated, "ty", &field_name)
            .unwrap_or_else(|| panic_no_key("ty", &field_name))
            .value()
            .into();

        Self {
            field_name,
            offset,
            ty,
        }
    }
}

impl Entry {
    pub fn end(&self) -> Quantity {
        self.offset + self.ty.word_size()
    }

    pub fn field_name_ident(&self) -> Ident {
        Ident::new(&self.field_name, Span::call_site())
    }

    /// Expression decoding the field from `words`, the whole block read.
    pub fn decode_tokens(&self) -> TokenStream {
        let offset = self.offset;
        let cnt = self.ty.word_size();
        match self.ty {
            DataType::Str(size) => quote! {
                alfen_modbus::codec::decode_string(words, #offset, #size)?
            },
            // Floats are committed with display precision
            DataType::F32 => quote! {
                alfen_modbus::codec::round2(f64::from(alfen_modbus::codec::decode::<f32>(words, #offset, #cnt)?))
            },
            DataType::F64 => quote! {
                alfen_modbus::codec::round2(alfen_modbus::codec::decode::<f64>(words, #offset, #cnt)?)
            },
            ty => {
                let primitive = ty.primitive();
                quote! {
                    alfen_modbus::codec::decode::<#primitive>(words, #offset, #cnt)?
                }
            }
        }
    }

    /// Expression encoding the field of `self` into its words.
    pub fn encode_tokens(&self) -> TokenStream {
        let field_name = self.field_name_ident();
        match self.ty {
            DataType::Str(size) => quote! {
                alfen_modbus::codec::encode_string(&self.#field_name, #size)
            },
            ty => {
                let primitive = ty.primitive();
                quote! {
                    {
                        #[allow(clippy::unnecessary_cast)]
                        let value = self.#field_name as #primitive;
                        alfen_modbus::codec::Encode::to_be_words(value)
                    }
                }
            }
        }
    }
}
