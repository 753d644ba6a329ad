use crate::error::{BatchError, Result};
use crate::params::ParamSet;

/// Substitutes `$name` / `${name}` placeholders with parameter values,
/// producing the literal script text fed to the benchmark tool.
///
/// Substitution is strict: a placeholder with no entry in the mapping is a
/// `TemplateError`, surfacing as a job-construction failure. `$$` escapes a
/// literal dollar sign.
pub fn render(template: &str, params: &ParamSet) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some(&(start, '{')) => {
                chars.next();
                let rest = &template[start + 1..];
                let end = rest.find('}').ok_or_else(|| BatchError::Template {
                    placeholder: rest.to_string(),
                })?;
                let name = &rest[..end];
                out.push_str(&lookup(params, name)?);
                // Skip the name and the closing brace
                while let Some(&(i, _)) = chars.peek() {
                    if i > start + 1 + end {
                        break;
                    }
                    chars.next();
                }
            }
            Some(&(start, c2)) if c2 == '_' || c2.is_ascii_alphabetic() => {
                let rest = &template[start..];
                let len = rest
                    .find(|c: char| c != '_' && !c.is_ascii_alphanumeric())
                    .unwrap_or(rest.len());
                let name = &rest[..len];
                out.push_str(&lookup(params, name)?);
                while let Some(&(i, _)) = chars.peek() {
                    if i >= start + len {
                        break;
                    }
                    chars.next();
                }
            }
            _ => {
                return Err(BatchError::Template {
                    placeholder: "$".to_string(),
                })
            }
        }
    }

    Ok(out)
}

fn lookup(params: &ParamSet, name: &str) -> Result<String> {
    params
        .get(name)
        .map(ToString::to_string)
        .ok_or_else(|| BatchError::Template {
            placeholder: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;

    fn params() -> ParamSet {
        ParamSet::new(vec![
            ("replicate".into(), ParamValue::Int(1)),
            ("bs".into(), ParamValue::Str("4k".into())),
            ("iodepth".into(), ParamValue::Int(32)),
        ])
    }

    #[test]
    fn substitutes_both_placeholder_forms() {
        let script = "[job]\nbs=$bs\niodepth=${iodepth}\n";
        let rendered = render(script, &params()).unwrap();
        assert_eq!(rendered, "[job]\nbs=4k\niodepth=32\n");
    }

    #[test]
    fn double_dollar_escapes() {
        assert_eq!(render("cost=$$5", &params()).unwrap(), "cost=$5");
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let err = render("runtime=$runtime", &params()).unwrap_err();
        match err {
            BatchError::Template { placeholder } => assert_eq!(placeholder, "runtime"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn placeholder_name_stops_at_non_identifier() {
        assert_eq!(render("size=${bs};end", &params()).unwrap(), "size=4k;end");
        assert_eq!(render("size=$bs;end", &params()).unwrap(), "size=4k;end");
    }

    #[test]
    fn bare_dollar_is_rejected() {
        assert!(render("price: $ 5", &params()).is_err());
    }
}
