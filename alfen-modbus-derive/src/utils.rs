use syn::{punctuated::Punctuated, token::Comma, Attribute, Expr, ExprAssign, Lit, LitInt, LitStr, Meta};

pub type Assignments = Punctuated<ExprAssign, Comma>;

pub fn get_punctuated(attr: &Attribute, name: &str) -> Assignments {
    match &attr.meta {
        Meta::List(meta_list) => meta_list
            .clone()
            .parse_args_with(Assignments::parse_terminated)
            .unwrap_or_else(|_| panic!("`modbus` attribute for `{name}` is not a comma separated sequence of assignment expressions.")),
        _ => panic!("The `modbus` attribute for `{name}` is not `MetaList`"),
    }
}

fn find_lit(punctuated: &Assignments, key: &str, name: &str) -> Option<Lit> {
    punctuated
        .iter()
        .find(|expr_assign| match expr_assign.left.as_ref() {
            Expr::Path(left) => left.path.is_ident(key),
            not_expr_path => panic!(
                "In the `modbus` attribute for {name}, the key `{not_expr_path:?}` is not a path expression."
            ),
        })
        .map(|expr_assign| match expr_assign.right.as_ref() {
            Expr::Lit(right) => right.lit.clone(),
            _ => panic_not_literal(key, "", name),
        })
}

pub fn find_int(punctuated: &Assignments, key: &str, name: &str) -> Option<LitInt> {
    find_lit(punctuated, key, name).map(|lit| match lit {
        Lit::Int(lit_int) => lit_int,
        _ => panic_not_literal(key, "integer", name),
    })
}

pub fn find_str(punctuated: &Assignments, key: &str, name: &str) -> Option<LitStr> {
    find_lit(punctuated, key, name).map(|lit| match lit {
        Lit::Str(lit_str) => lit_str,
        _ => panic_not_literal(key, "string", name),
    })
}

pub fn parse_u16(lit_int: &LitInt, key: &str, name: &str) -> u16 {
    lit_int.base10_parse::<u16>().unwrap_or_else(|_| {
        panic!("In `modbus` attribute for `{name}`, the key `{key}` could not be parsed to u16.")
    })
}

pub fn panic_not_literal(key: &str, lit_ty: &str, name: &str) -> ! {
    panic!(
        "In `modbus` attribute for `{}`, the key `{}` is not set to a {} literal.",
        name, key, lit_ty
    )
}

pub fn panic_no_key(key: &str, name: &str) -> ! {
    panic!("In `modbus` attribute for `{}`, no key `{}`", name, key)
}
