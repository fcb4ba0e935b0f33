use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, parse_macro_input};

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Check if a field has a specific attribute
fn has_attr(field: &syn::Field, attr_name: &str) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident(attr_name))
}

fn parse_str(meta: &syn::meta::ParseNestedMeta) -> syn::Result<String> {
    meta.input.parse::<syn::Token![=]>()?;
    match meta.input.parse::<Lit>()? {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

#[derive(Default)]
struct ColumnAttrs {
    skip: bool,
    name: Option<String>,
    caption: Option<String>,
    read_only: bool,
    reference: Option<String>,
}

/// Collect `#[column(...)]` options of a field
fn parse_column_attrs(field: &syn::Field) -> syn::Result<ColumnAttrs> {
    let mut attrs = ColumnAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("column") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                attrs.skip = true;
            } else if meta.path.is_ident("read_only") {
                attrs.read_only = true;
            } else if meta.path.is_ident("name") {
                attrs.name = Some(parse_str(&meta)?);
            } else if meta.path.is_ident("caption") {
                attrs.caption = Some(parse_str(&meta)?);
            } else if meta.path.is_ident("reference") {
                attrs.reference = Some(parse_str(&meta)?);
            } else {
                return Err(meta.error("unknown column option"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

#[derive(Default)]
struct EntityAttrs {
    key: Option<String>,
    camel_case: bool,
}

/// Parse #[entity(key = "...", rename_all = "...")]
fn parse_entity_attrs(input: &DeriveInput) -> syn::Result<EntityAttrs> {
    let mut attrs = EntityAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("key") {
                attrs.key = Some(parse_str(&meta)?);
            } else if meta.path.is_ident("rename_all") {
                match parse_str(&meta)?.as_str() {
                    "camelCase" => attrs.camel_case = true,
                    "snake_case" => attrs.camel_case = false,
                    _ => return Err(meta.error("rename_all must be \"camelCase\" or \"snake_case\"")),
                }
            } else {
                return Err(meta.error("unknown entity option"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

/// Map a Rust type to a column constructor and its nullability
fn rust_type_to_value_type(ty: &syn::Type) -> (&'static str, bool) {
    let type_str = quote::quote!(#ty).to_string();
    // Remove spaces for easier matching
    let type_str = type_str.replace(' ', "");

    // Option<T> is nullable - extract inner type
    let (inner_type, nullable) = if type_str.starts_with("Option<") && type_str.ends_with('>') {
        (&type_str[7..type_str.len() - 1], true)
    } else {
        (type_str.as_str(), false)
    };

    let constructor = match inner_type {
        s if s.ends_with("NaiveDate") => "date",
        "u8" | "u16" | "u32" | "u64" | "usize" | "i8" | "i16" | "i32" | "i64" | "isize" => {
            "integer"
        }
        "f32" | "f64" => "float",
        "bool" => "boolean",
        // Default to string for String and everything else
        _ => "string",
    };
    (constructor, nullable)
}

/// `ValueType` variant of a column constructor name
fn value_type_variant(constructor: &str) -> &'static str {
    match constructor {
        "integer" => "Integer",
        "float" => "Float",
        "boolean" => "Boolean",
        "date" => "Date",
        _ => "String",
    }
}

/// Derive macro for the `Entity` trait
///
/// Generates `entity_key()` and a `metadata()` that registers every named
/// field as a column through `EntityMetadata::builder`.
///
/// ## Attributes
///
/// - `#[entity(key = "...")]` - entity key (default: the struct name)
/// - `#[entity(rename_all = "camelCase")]` - column keys from camelCased field names
/// - `#[id]` - identity column; repeat for composite ids (default: first column)
/// - `#[column(name = "...")]` - explicit column key
/// - `#[column(caption = "...")]` - display caption
/// - `#[column(read_only)]` - ignored in REST bodies
/// - `#[column(reference = "entity")]` - holds the id of a row of `entity`;
///   the field type gives the id type
/// - `#[column(skip)]` - not a column
///
/// ## Example
///
/// ```text
/// #[derive(Entity, Serialize, Deserialize)]
/// #[entity(key = "products", rename_all = "camelCase")]
/// #[serde(rename_all = "camelCase")]
/// struct Product {
///     #[id]
///     pub id: i64,
///     pub product_name: String,
///     pub price: f64,
///     #[column(reference = "categories")]
///     pub category: Option<i64>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, id, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_entity(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Entity can only be derived for structs",
            ));
        }
    };

    let entity = parse_entity_attrs(input)?;
    let key = entity.key.unwrap_or_else(|| name.to_string());

    let mut columns = Vec::new();
    let mut ids = Vec::new();
    for field in fields {
        let attrs = parse_column_attrs(field)?;
        if attrs.skip {
            continue;
        }
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let col_key = attrs.name.unwrap_or_else(|| {
            if entity.camel_case {
                to_camel_case(&field_name.to_string())
            } else {
                field_name.to_string()
            }
        });

        let (constructor, nullable) = rust_type_to_value_type(&field.ty);
        let mut column = match &attrs.reference {
            Some(target) => {
                let id_type = syn::Ident::new(
                    value_type_variant(constructor),
                    proc_macro2::Span::call_site(),
                );
                quote! {
                    datagate::Column::reference(#col_key, #target)
                        .id_type(datagate::ValueType::#id_type)
                }
            }
            None => {
                let constructor = syn::Ident::new(constructor, proc_macro2::Span::call_site());
                quote! { datagate::Column::#constructor(#col_key) }
            }
        };
        if nullable {
            column = quote! { #column.allow_null() };
        }
        if let Some(caption) = &attrs.caption {
            column = quote! { #column.caption(#caption) };
        }
        if attrs.read_only {
            column = quote! { #column.read_only() };
        }

        if has_attr(field, "id") {
            ids.push(col_key);
        }
        columns.push(column);
    }

    Ok(quote! {
        impl datagate::Entity for #name {
            fn entity_key() -> &'static str {
                #key
            }

            fn metadata() -> Result<datagate::EntityMetadata, datagate::MetadataError> {
                datagate::EntityMetadata::builder(#key)
                    #(.column(#columns))*
                    #(.id(#ids))*
                    .build()
            }
        }
    })
}
