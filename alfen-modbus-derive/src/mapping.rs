use crate::entry::{Entry, Quantity};
use proc_macro2::{Ident, Span, TokenStream};
use syn::{Data, DeriveInput, Fields};

#[derive(Debug, Clone)]
pub struct Mapping {
    pub entries: Vec<Entry>,
    /// Fields without `modbus` attribute, filled with their default value.
    pub unmapped: Vec<String>,
}

impl Mapping {
    pub fn new(ast: &DeriveInput) -> Self {
        let data_struct = match ast.data.clone() {
            Data::Struct(data_struct) => data_struct,
            _ => panic!("Trait can be implemented only for a struct."),
        };

        let named_fields = match data_struct.fields {
            Fields::Named(fields_named) => fields_named.named,
            _ => panic!("Trait can be implemented only for a struct with named fields."),
        };

        let (mapped, unmapped): (Vec<_>, Vec<_>) = named_fields.into_iter().partition(|field| {
            field
                .attrs
                .iter()
                .any(|attr| attr.path().is_ident("modbus"))
        });

        let mut entries: Vec<Entry> = mapped.into_iter().map(From::from).collect();
        entries.sort_by_key(|x| x.offset);

        let unmapped = unmapped
            .into_iter()
            .filter_map(|field| field.ident.map(|ident| ident.to_string()))
            .collect();

        Self { entries, unmapped }
    }

    /// Panic at compile time if a field runs past the block end.
    ///
    /// Fields may share registers, each one is decoded from its own span.
    pub fn validate(&self, cnt: Quantity) {
        if let Some(last) = self.entries.iter().max_by_key(|x| x.end()) {
            if last.end() > cnt {
                panic!(
                    "Field `{}` ends at offset {} past the block size {}.",
                    last.field_name,
                    last.end(),
                    cnt
                );
            }
        }
    }

    pub fn field_name_vec(&self) -> Vec<Ident> {
        self.entries
            .iter()
            .map(|x| x.field_name_ident())
            .collect::<Vec<_>>()
    }

    pub fn offset_vec(&self) -> Vec<Quantity> {
        self.entries.iter().map(|x| x.offset).collect::<Vec<_>>()
    }

    pub fn decode_vec(&self) -> Vec<TokenStream> {
        self.entries
            .iter()
            .map(|entry| entry.decode_tokens())
            .collect::<Vec<_>>()
    }

    pub fn encode_vec(&self) -> Vec<TokenStream> {
        self.entries
            .iter()
            .map(|entry| entry.encode_tokens())
            .collect::<Vec<_>>()
    }

    pub fn unmapped_vec(&self) -> Vec<Ident> {
        self.unmapped
            .iter()
            .map(|name| Ident::new(name, Span::call_site()))
            .collect::<Vec<_>>()
    }
}
