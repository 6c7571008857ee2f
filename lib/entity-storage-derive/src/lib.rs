use std::collections::HashSet;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, parse_macro_input};

/// Check if a field has a specific attribute
fn has_attr(field: &syn::Field, attr_name: &str) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident(attr_name))
}

/// Options from `#[attribute(...)]` on a field.
#[derive(Default)]
struct AttributeOptions {
    name: Option<String>,
    kind: Option<String>,
    default: Option<String>,
    skip: bool,
}

fn parse_string_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<String> {
    meta.input.parse::<syn::Token![=]>()?;
    let lit: Lit = meta.input.parse()?;
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

fn parse_attribute_options(field: &syn::Field) -> syn::Result<AttributeOptions> {
    let mut options = AttributeOptions::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("attribute") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                options.name = Some(parse_string_value(&meta)?);
            } else if meta.path.is_ident("kind") {
                options.kind = Some(parse_string_value(&meta)?);
            } else if meta.path.is_ident("default") {
                options.default = Some(parse_string_value(&meta)?);
            } else if meta.path.is_ident("skip") {
                options.skip = true;
            } else {
                return Err(meta.error("expected `name`, `kind`, `default` or `skip`"));
            }
            Ok(())
        })?;
    }
    Ok(options)
}

/// Parse #[entity(table = "...")] attribute and return table name
fn parse_entity_attr(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if attr.path().is_ident("entity") {
            let mut table_name = None;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("table") {
                    table_name = Some(parse_string_value(&meta)?);
                    Ok(())
                } else {
                    Err(meta.error("expected `table`"))
                }
            })?;
            if let Some(table_name) = table_name {
                return Ok(table_name);
            }
        }
    }
    Err(syn::Error::new(
        Span::call_site(),
        "EntityKind requires #[entity(table = \"...\")]",
    ))
}

/// Inner type of `Option<T>`, if the type is an option.
fn option_inner(ty: &syn::Type) -> Option<&syn::Type> {
    let syn::Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

/// Map a Rust field type to an attribute kind name
fn rust_type_to_kind(ty: &syn::Type) -> Option<&'static str> {
    let type_str = quote!(#ty).to_string().replace(' ', "");

    match type_str.as_str() {
        "bool" => Some("bool"),
        "i64" | "i32" | "u32" => Some("int"),
        "f64" => Some("float"),
        "String" => Some("string"),
        s if s.ends_with("StorageDatetime") => Some("datetime"),
        s if s.starts_with("Vec<") => Some("array"),
        s if s.ends_with("Value") => Some("json"),
        _ => None,
    }
}

fn kind_tokens(kind: &str) -> Option<TokenStream2> {
    let variant = match kind {
        "bool" => quote!(Bool),
        "int" => quote!(Int),
        "float" => quote!(Float),
        "string" => quote!(String),
        "datetime" => quote!(Datetime),
        "date" => quote!(Date),
        "array" => quote!(Array),
        "json" => quote!(Json),
        "enum-bool" => quote!(EnumBool),
        "epoch" => quote!(Epoch),
        _ => return None,
    };
    Some(quote!(entity_storage::AttributeType::#variant))
}

/// Derive macro for the EntityKind trait
///
/// Maps a struct with named fields onto one entity table. Every field is an
/// attribute of the same name unless renamed or skipped.
///
/// ## Attributes
///
/// - `#[entity(table = "...")]` on the struct (required)
/// - `#[id]` marks a primary key column; declaration order is key order
/// - `#[attribute(name = "...")]` stores the field under another column name
/// - `#[attribute(kind = "...")]` overrides the inferred attribute type
///   (`bool`, `int`, `float`, `string`, `datetime`, `date`, `array`, `json`,
///   `enum-bool`, `epoch`)
/// - `#[attribute(default = "...")]` default in storage form
/// - `#[attribute(skip)]` leaves the field out; it is filled with
///   `Default::default()` when read
///
/// `Option<T>` fields read as `None` while the attribute is unset or NULL and
/// are left untouched when written as `None`.
///
/// ## Example
///
/// ```text
/// #[derive(EntityKind)]
/// #[entity(table = "widgets")]
/// struct Widget {
///     #[id]
///     pub id: Option<i64>,
///     pub name: String,
///     #[attribute(kind = "epoch")]
///     pub created: StorageDatetime,
///     #[attribute(default = "1")]
///     pub enabled: bool,
/// }
/// ```
#[proc_macro_derive(EntityKind, attributes(entity, id, attribute))]
pub fn derive_entity_kind(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity_kind(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(e) => TokenStream::from(e.to_compile_error()),
    }
}

fn expand_entity_kind(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "EntityKind only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "EntityKind only supports structs",
            ));
        }
    };

    let table_name = parse_entity_attr(input)?;

    let mut declarations = Vec::new();
    let mut reads = Vec::new();
    let mut writes = Vec::new();
    let mut seen = HashSet::new();

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let options = parse_attribute_options(field)?;

        if options.skip {
            if has_attr(field, "id") {
                return Err(syn::Error::new_spanned(
                    field,
                    "an #[id] field cannot be skipped",
                ));
            }
            reads.push(quote! { #field_name: ::core::default::Default::default() });
            continue;
        }

        let column = options.name.unwrap_or_else(|| field_name.to_string());
        if !seen.insert(column.clone()) {
            return Err(syn::Error::new_spanned(
                field,
                format!("column '{}' declared twice", column),
            ));
        }

        let optional = option_inner(&field.ty);
        let value_ty = optional.unwrap_or(&field.ty);

        let kind = match options.kind {
            Some(kind) => kind,
            None => rust_type_to_kind(value_ty)
                .ok_or_else(|| {
                    syn::Error::new_spanned(
                        &field.ty,
                        "cannot infer attribute kind; add #[attribute(kind = \"...\")]",
                    )
                })?
                .to_string(),
        };
        let ty = kind_tokens(&kind).ok_or_else(|| {
            syn::Error::new_spanned(field, format!("unknown attribute kind '{}'", kind))
        })?;

        let declaration = if has_attr(field, "id") {
            if options.default.is_some() {
                return Err(syn::Error::new_spanned(
                    field,
                    "an #[id] field cannot have a default",
                ));
            }
            quote! { .id(#column, #ty) }
        } else if let Some(default) = options.default {
            quote! { .attribute_with_default(#column, #ty, #default) }
        } else {
            quote! { .attribute(#column, #ty) }
        };
        declarations.push(declaration);

        if optional.is_some() {
            reads.push(quote! { #field_name: entity.read_optional(#column)? });
            writes.push(quote! {
                if let Some(value) = &self.#field_name {
                    entity.set(#column, value.clone())?;
                }
            });
        } else {
            reads.push(quote! { #field_name: entity.read(#column)? });
            writes.push(quote! { entity.set(#column, self.#field_name.clone())?; });
        }
    }

    Ok(quote! {
        impl entity_storage::EntityKind for #name {
            fn definition() -> ::core::result::Result<entity_storage::EntityDefinition, entity_storage::StorageError> {
                entity_storage::EntityDefinition::builder(#table_name)
                    #(#declarations)*
                    .build()
            }

            fn from_entity(entity: &entity_storage::Entity) -> ::core::result::Result<Self, entity_storage::StorageError> {
                ::core::result::Result::Ok(Self {
                    #(#reads),*
                })
            }

            fn apply_to(&self, entity: &mut entity_storage::Entity) -> ::core::result::Result<(), entity_storage::StorageError> {
                #(#writes)*
                ::core::result::Result::Ok(())
            }
        }
    })
}
