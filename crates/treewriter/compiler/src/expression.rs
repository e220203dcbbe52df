// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Parsing of inline field references and aggregate field-set expressions
//!
//! Value expressions mix literal text with references to input fields:
//! `$port.field`, `${port.field}` or `{$port.field}`, where `port` is a port
//! index or a record name. A doubled `$$` stands for a literal `$`.
//!
//! Aggregate expressions select a set of fields for wildcard expansion:
//! `[namespace:]$port.pattern`, where `*` in the pattern matches any run of
//! characters.

use regex::Regex;
use std::sync::LazyLock;

const PORT_PATTERN: &str = r"(?:[_A-Za-z][_A-Za-z0-9]*|[0-9]+)";
const NAME_PATTERN: &str = r"[_A-Za-z][_A-Za-z0-9]*";

static VALUE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\$\$|\$\{{(?P<bp>{port})\.(?P<bf>{name})\}}|\{{\$(?P<cp>{port})\.(?P<cf>{name})\}}|\$(?P<p>{port})\.(?P<f>{name})",
        port = PORT_PATTERN,
        name = NAME_PATTERN
    ))
    .expect("value reference pattern is valid")
});

static FIELD_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\${port}\.[_A-Za-z*][_A-Za-z0-9*]*", port = PORT_PATTERN)).expect("field reference pattern is valid")
});

static AGGREGATE_EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:(?P<ns>.*):)?\$(?P<port>{port})\.(?P<fields>[_A-Za-z*][_A-Za-z0-9*]*)$",
        port = PORT_PATTERN
    ))
    .expect("aggregate expression pattern is valid")
});

/// Delimiters of key and field-set lists
pub const LIST_DELIMITERS: [char; 2] = [';', '|'];

/// Reference to one field of one port, as written by the user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldReference {
    pub port: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSegment {
    Literal(String),
    Reference(FieldReference),
}

/// Splits a value expression into literal text and field references.
///
/// The input is trimmed first. Adjacent literal text is merged.
pub fn parse_value_expression(input: &str) -> Vec<ValueSegment> {
    let input = input.trim();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut processed = 0;

    for captures in VALUE_REFERENCE.captures_iter(input) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        literal.push_str(&input[processed..whole.start()]);
        processed = whole.end();

        let reference = [("bp", "bf"), ("cp", "cf"), ("p", "f")]
            .into_iter()
            .find_map(|(p, f)| Some((captures.name(p)?, captures.name(f)?)));
        match reference {
            Some((port, field)) => {
                if !literal.is_empty() {
                    segments.push(ValueSegment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(ValueSegment::Reference(FieldReference {
                    port: port.as_str().to_string(),
                    field: field.as_str().to_string(),
                }));
            }
            None => literal.push('$'),
        }
    }

    literal.push_str(&input[processed..]);
    if !literal.is_empty() {
        segments.push(ValueSegment::Literal(literal));
    }
    segments
}

/// Field references of a value expression, in order of appearance
pub fn field_references(input: &str) -> Vec<FieldReference> {
    parse_value_expression(input)
        .into_iter()
        .filter_map(|segment| match segment {
            ValueSegment::Reference(reference) => Some(reference),
            ValueSegment::Literal(_) => None,
        })
        .collect()
}

/// Replaces every `$port.field` reference in `text` by `replacement`
pub fn replace_field_references(text: &str, replacement: &str) -> String {
    FIELD_REFERENCE.replace_all(text, replacement).into_owned()
}

/// Whether `text` is exactly one field reference
pub fn is_field_reference(text: &str) -> bool {
    FIELD_REFERENCE.find(text).is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

/// Parsed form of an aggregate expression
#[derive(Debug, Clone)]
pub struct ParsedFieldExpression {
    pub namespace: Option<String>,
    pub port: String,
    /// Field pattern as written, `*` included
    pub fields: String,
    matcher: Regex,
}

impl ParsedFieldExpression {
    pub fn matches(&self, field_name: &str) -> bool {
        self.matcher.is_match(field_name)
    }
}

impl PartialEq for ParsedFieldExpression {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.port == other.port && self.fields == other.fields
    }
}

pub fn is_aggregate_expression(expression: &str) -> bool {
    AGGREGATE_EXPRESSION.is_match(expression)
}

/// Parses `[namespace:]$port.pattern`; `None` when the format does not match
pub fn parse_aggregate_expression(expression: &str) -> Option<ParsedFieldExpression> {
    let captures = AGGREGATE_EXPRESSION.captures(expression)?;
    let fields = captures.name("fields")?.as_str().to_string();
    let matcher = Regex::new(&format!("^{}$", fields.replace('*', ".*"))).ok()?;
    Some(ParsedFieldExpression {
        namespace: captures.name("ns").map(|ns| ns.as_str().to_string()),
        port: captures.name("port")?.as_str().to_string(),
        fields,
        matcher,
    })
}

/// Splits a key or field-set list, dropping blanks
pub fn split_list(list: &str) -> Vec<String> {
    list.split(LIST_DELIMITERS)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Case-insensitive `true`/`false`
pub fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Splits `prefix:name` at the first colon
pub fn split_qualified_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || c == '-' || c == '.'
}

/// XML name without a colon
pub fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
}

/// XML qualified name, `prefix:local` or `local`
pub fn is_qname(name: &str) -> bool {
    match name.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference(port: &str, field: &str) -> ValueSegment {
        ValueSegment::Reference(FieldReference {
            port: port.to_string(),
            field: field.to_string(),
        })
    }

    fn literal(text: &str) -> ValueSegment {
        ValueSegment::Literal(text.to_string())
    }

    #[test]
    fn test_plain_and_braced_references() {
        assert_eq!(
            parse_value_expression("Hello $0.name!"),
            vec![literal("Hello "), reference("0", "name"), literal("!")]
        );
        assert_eq!(
            parse_value_expression("${customer.id}abc"),
            vec![reference("customer", "id"), literal("abc")]
        );
        assert_eq!(
            parse_value_expression("{$1.first}{$1.last}"),
            vec![reference("1", "first"), reference("1", "last")]
        );
    }

    #[test]
    fn test_escaped_dollar() {
        assert_eq!(parse_value_expression("price $$ $0.amount"), vec![literal("price $ "), reference("0", "amount")]);
        assert_eq!(parse_value_expression("$$0.amount"), vec![literal("$0.amount")]);
    }

    #[test]
    fn test_value_is_trimmed() {
        assert_eq!(parse_value_expression("  $0.a  "), vec![reference("0", "a")]);
        assert!(parse_value_expression("   ").is_empty());
    }

    #[test]
    fn test_aggregate_expression() {
        let parsed = parse_aggregate_expression("ns:$orders.cust*").unwrap();
        assert_eq!(parsed.namespace.as_deref(), Some("ns"));
        assert_eq!(parsed.port, "orders");
        assert_eq!(parsed.fields, "cust*");
        assert!(parsed.matches("custId"));
        assert!(parsed.matches("cust"));
        assert!(!parsed.matches("xcust"));

        let all = parse_aggregate_expression("$0.*").unwrap();
        assert_eq!(all.namespace, None);
        assert!(all.matches("anything"));

        assert!(parse_aggregate_expression("$0").is_none());
        assert!(!is_aggregate_expression("$0.1abc"));
    }

    #[test]
    fn test_aggregate_expression_requires_dollar() {
        assert!(!is_aggregate_expression("0.id"));
        assert!(parse_aggregate_expression("ns:orders.*").is_none());
        assert!(is_aggregate_expression("ns:$orders.*"));
    }

    #[test]
    fn test_replace_field_references() {
        assert_eq!(replace_field_references("item_$0.name", "x"), "item_x");
        assert!(is_field_reference("$in.name"));
        assert!(!is_field_reference("p$in.name"));
    }

    #[test]
    fn test_split_list_and_bool() {
        assert_eq!(split_list("a; b|c;;"), vec!["a", "b", "c"]);
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn test_qualified_names() {
        assert_eq!(split_qualified_name("ns:item"), (Some("ns"), "item"));
        assert_eq!(split_qualified_name("item"), (None, "item"));
        assert!(is_qname("ns:item-1"));
        assert!(is_qname("_x.y"));
        assert!(!is_qname("1abc"));
        assert!(!is_qname("a:b:c"));
        assert!(!is_qname(""));
    }

    proptest! {
        #[test]
        fn prop_text_without_dollar_is_one_literal(text in "[a-zA-Z0-9 ,.!?]{1,40}") {
            let trimmed = text.trim();
            let segments = parse_value_expression(&text);
            if trimmed.is_empty() {
                prop_assert!(segments.is_empty());
            } else {
                prop_assert_eq!(segments, vec![ValueSegment::Literal(trimmed.to_string())]);
            }
        }

        #[test]
        fn prop_reference_round_trips(port in "[a-z][a-z0-9]{0,6}|[0-9]{1,3}", field in "[a-z_][a-zA-Z0-9_]{0,8}") {
            let expression = format!("[${{{}.{}}}]", port, field);
            let references = field_references(&expression);
            prop_assert_eq!(references, vec![FieldReference { port, field }]);
        }
    }
}
