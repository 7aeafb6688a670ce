//! Positional templates in the `str.format` dialect used by on-wiki bot config
//! pages: `{}`, `{0}`, `{1:02d}`, and `{{` / `}}` for literal braces.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unmatched '{{' in template")]
    UnclosedField,
    #[error("single '}}' encountered in template")]
    StrayClosingBrace,
    #[error("replacement index {index} out of range for {available} argument(s)")]
    IndexOutOfRange { index: usize, available: usize },
    #[error("cannot switch between automatic and manual field numbering")]
    MixedNumbering,
    #[error("invalid field name '{0}'")]
    InvalidField(String),
    #[error("unsupported format spec '{0}'")]
    UnsupportedSpec(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Numbering {
    Automatic,
    Manual,
}

/// Render `template` with integer positional arguments.
pub fn render(template: &str, args: &[i64]) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut numbering: Option<Numbering> = None;
    let mut next_automatic = 0usize;

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                output.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                output.push('}');
            }
            '}' => return Err(TemplateError::StrayClosingBrace),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => return Err(TemplateError::InvalidField(field)),
                        Some(other) => field.push(other),
                        None => return Err(TemplateError::UnclosedField),
                    }
                }

                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name, spec),
                    None => (field.as_str(), ""),
                };
                let index = if name.is_empty() {
                    switch_numbering(&mut numbering, Numbering::Automatic)?;
                    next_automatic += 1;
                    next_automatic - 1
                } else {
                    switch_numbering(&mut numbering, Numbering::Manual)?;
                    name.parse::<usize>()
                        .map_err(|_| TemplateError::InvalidField(name.to_string()))?
                };
                let value = args.get(index).ok_or(TemplateError::IndexOutOfRange {
                    index,
                    available: args.len(),
                })?;
                push_integer(&mut output, *value, spec)?;
            }
            other => output.push(other),
        }
    }

    Ok(output)
}

/// Check that `template` renders with exactly `arity` integer arguments available.
pub fn validate(template: &str, arity: usize) -> Result<(), TemplateError> {
    render(template, &vec![0; arity]).map(|_| ())
}

fn switch_numbering(current: &mut Option<Numbering>, wanted: Numbering) -> Result<(), TemplateError> {
    match current {
        Some(existing) if *existing != wanted => Err(TemplateError::MixedNumbering),
        _ => {
            *current = Some(wanted);
            Ok(())
        }
    }
}

fn push_integer(output: &mut String, value: i64, spec: &str) -> Result<(), TemplateError> {
    let digits = spec.strip_suffix('d').unwrap_or(spec);
    if digits.is_empty() {
        output.push_str(&value.to_string());
        return Ok(());
    }
    if !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(TemplateError::UnsupportedSpec(spec.to_string()));
    }
    let width = digits
        .parse::<usize>()
        .map_err(|_| TemplateError::UnsupportedSpec(spec.to_string()))?;
    if digits.len() > 1 && digits.starts_with('0') {
        output.push_str(&format!("{value:0width$}"));
    } else {
        output.push_str(&format!("{value:>width$}"));
    }
    Ok(())
}
