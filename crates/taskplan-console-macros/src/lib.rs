use proc_macro::TokenStream;

use quote::quote;
use syn::{
    Attribute, Expr, ExprLit, ItemStruct, Lit, Meta, Token, parse::Parser, spanned::Spanned,
};

/// Declares one backend endpoint on a unit struct.
///
/// ```ignore
/// #[Endpoint(id = "pause", path = "/pause/{uuid}")]
/// pub struct Pause;
///
/// #[Endpoint(id = "add_param", path = "/add_param", method = "POST", body = true)]
/// pub struct AddParam;
/// ```
///
/// Keys: `id` (required), `path` (required, must start with `/`), `method`
/// (`"GET"` or `"POST"`, default `"GET"`), `body` (default `false`, only
/// allowed with POST) and `label` (defaults to `id`).
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Endpoint(attr: TokenStream, item: TokenStream) -> TokenStream {
    match endpoint_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn lit_str(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        _ => Err(syn::Error::new(expr.span(), "expected string literal")),
    }
}

fn lit_bool(expr: &Expr) -> syn::Result<bool> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Bool(b), ..
        }) => Ok(b.value),
        _ => Err(syn::Error::new(expr.span(), "expected bool literal")),
    }
}

fn drop_our_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| {
            let Meta::Path(p) = &a.meta else {
                return true;
            };
            let Some(ident) = p.get_ident() else {
                return true;
            };
            ident != "Endpoint"
        })
        .cloned()
        .collect()
}

// Counts `{name}` placeholders and rejects unbalanced or empty braces.
fn count_placeholders(path: &str) -> Result<usize, String> {
    let mut count = 0usize;
    let mut open: Option<String> = None;
    for c in path.chars() {
        if let Some(name) = open.as_mut() {
            match c {
                '}' => {
                    if name.is_empty() {
                        return Err("empty '{}' placeholder in endpoint path".into());
                    }
                    count += 1;
                    open = None;
                }
                '{' => return Err("nested '{' in endpoint path".into()),
                c if c.is_ascii_alphanumeric() || c == '_' => name.push(c),
                c => return Err(format!("invalid character '{c}' in placeholder name")),
            }
        } else {
            match c {
                '{' => open = Some(String::new()),
                '}' => return Err("unmatched '}' in endpoint path".into()),
                _ => {}
            }
        }
    }
    if open.is_some() {
        return Err("unterminated '{' in endpoint path".into());
    }
    Ok(count)
}

struct EndpointMeta {
    id: String,
    path: String,
    post: bool,
    body: bool,
    label: String,
    segments: usize,
}

fn endpoint_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    if !matches!(st.fields, syn::Fields::Unit) {
        return Err(syn::Error::new(
            st.fields.span(),
            "Endpoint: only unit structs are supported",
        ));
    }

    let parser = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated;
    let metas = parser.parse(attr)?;

    let mut id: Option<String> = None;
    let mut path: Option<(String, proc_macro2::Span)> = None;
    let mut method: Option<(String, proc_macro2::Span)> = None;
    let mut body = false;
    let mut label: Option<String> = None;

    for m in metas {
        let Meta::NameValue(nv) = m else {
            return Err(syn::Error::new(m.span(), "expected key = value"));
        };
        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
            return Err(syn::Error::new(nv.path.span(), "expected ident key"));
        };
        let v = &nv.value;
        match key.as_str() {
            "id" => id = Some(lit_str(v)?),
            "path" => path = Some((lit_str(v)?, v.span())),
            "method" => method = Some((lit_str(v)?, v.span())),
            "body" => body = lit_bool(v)?,
            "label" => label = Some(lit_str(v)?),
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Endpoint attribute key '{other}'"),
                ));
            }
        }
    }

    let id = id.ok_or_else(|| syn::Error::new(struct_ident.span(), "Endpoint: missing id"))?;
    let (path, path_span) =
        path.ok_or_else(|| syn::Error::new(struct_ident.span(), "Endpoint: missing path"))?;
    if !path.starts_with('/') {
        return Err(syn::Error::new(path_span, "Endpoint: path must start with '/'"));
    }
    let segments = count_placeholders(&path).map_err(|e| syn::Error::new(path_span, e))?;

    let post = match method {
        None => false,
        Some((m, span)) => match m.as_str() {
            "GET" => false,
            "POST" => true,
            other => {
                return Err(syn::Error::new(
                    span,
                    format!("Endpoint: unsupported method '{other}' (expected GET or POST)"),
                ));
            }
        },
    };
    if body && !post {
        return Err(syn::Error::new(
            struct_ident.span(),
            "Endpoint: body = true requires method = \"POST\"",
        ));
    }

    let meta = EndpointMeta {
        label: label.unwrap_or_else(|| id.clone()),
        id,
        path,
        post,
        body,
        segments,
    };

    let id_lit = meta.id;
    let path_lit = meta.path;
    let label_lit = meta.label;
    let body_bool = meta.body;
    let segments_lit = meta.segments;
    let method_tokens = if meta.post {
        quote! { crate::dispatch::Method::Post }
    } else {
        quote! { crate::dispatch::Method::Get }
    };

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub const ID: &'static str = #id_lit;
            pub const PATH: &'static str = #path_lit;
            pub const LABEL: &'static str = #label_lit;
            pub const METHOD: crate::dispatch::Method = #method_tokens;
            pub const SEGMENTS: usize = #segments_lit;
            pub const BODY: bool = #body_bool;
        }

        impl crate::dispatch::Endpoint for #struct_ident {
            fn id(&self) -> &'static str {
                Self::ID
            }

            fn template(&self) -> &'static str {
                Self::PATH
            }

            fn label(&self) -> &'static str {
                Self::LABEL
            }

            fn method(&self) -> crate::dispatch::Method {
                Self::METHOD
            }

            fn segments(&self) -> usize {
                Self::SEGMENTS
            }

            fn takes_body(&self) -> bool {
                Self::BODY
            }
        }
    };

    Ok(expanded.into())
}
