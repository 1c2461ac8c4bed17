use crate::entry::{Address, Quantity};
use crate::utils::{find_int, get_punctuated, panic_no_key, parse_u16};
use syn::DeriveInput;

/// Largest block a single read holding registers request may return.
pub const MAX_CNT_PER_REQUEST: Quantity = 125;

#[derive(Debug)]
/// Struct level `modbus` attribute: where the block lives and how many registers it spans.
pub struct Config {
    pub addr: Address,
    pub cnt: Quantity,
}

impl Config {
    pub fn new(ast: &DeriveInput) -> Self {
        let name = &ast.ident.to_string();

        let attr = ast
            .attrs
            .iter()
            .find(|attr| attr.path().is_ident("modbus"))
            .unwrap_or_else(|| panic!("Missing struct attribute `modbus(addr = .., cnt = ..)` on `{name}`."));
        let punctuated = get_punctuated(attr, name);

        let addr = find_int(&punctuated, "addr", name)
            .map(|lit_int| parse_u16(&lit_int, "addr", name))
            .unwrap_or_else(|| panic_no_key("addr", name));
        let cnt = find_int(&punctuated, "cnt", name)
            .map(|lit_int| parse_u16(&lit_int, "cnt", name))
            .unwrap_or_else(|| panic_no_key("cnt", name));

        if cnt == 0 || cnt > MAX_CNT_PER_REQUEST {
            panic!("In `modbus` attribute for `{name}`, `cnt` must be within 1..={MAX_CNT_PER_REQUEST}.");
        }

        Self { addr, cnt }
    }
}
