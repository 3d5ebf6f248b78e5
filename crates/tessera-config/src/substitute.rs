//! `${key}` replacement in property values.
//!
//! References resolve against the property provider first and the process
//! environment second. Unknown references expand to the empty string.
//! References may nest (`${a.${b}}`) and may point at values that contain
//! references themselves.

use crate::error::{ConfigError, ConfigResult};
use crate::properties::PropertyProvider;

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Replace every `${key}` in `value`.
///
/// # Errors
///
/// Returns [`ConfigError::CyclicReference`] if a reference expands to itself.
pub fn substitute(value: &str, props: &dyn PropertyProvider) -> ConfigResult<String> {
    let mut stack = Vec::new();
    expand(value, props, &mut stack)
}

/// Look up `key` and replace references in its value.
///
/// # Errors
///
/// Returns [`ConfigError::CyclicReference`] if a reference expands to itself.
pub fn resolved_property(props: &dyn PropertyProvider, key: &str) -> ConfigResult<Option<String>> {
    let Some(raw) = props.property(key) else {
        return Ok(None);
    };
    let mut stack = vec![key.to_owned()];
    expand(&raw, props, &mut stack).map(Some)
}

fn expand(value: &str, props: &dyn PropertyProvider, stack: &mut Vec<String>) -> ConfigResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find(OPEN) {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);
        let body = tail.get(OPEN.len()..).unwrap_or_default();

        let Some(end) = matching_close(body) else {
            // Unterminated reference: keep it literally.
            out.push_str(tail);
            return Ok(out);
        };
        let inner = body.get(..end).unwrap_or_default();
        let key = expand(inner, props, stack)?;

        if stack.contains(&key) {
            return Err(ConfigError::CyclicReference(key));
        }
        let replacement = match props.property(&key) {
            Some(raw) => {
                stack.push(key);
                let expanded = expand(&raw, props, stack)?;
                stack.pop();
                expanded
            },
            None => std::env::var(&key).unwrap_or_default(),
        };
        out.push_str(&replacement);

        rest = body.get(end.saturating_add(1)..).unwrap_or_default();
    }
    out.push_str(rest);
    Ok(out)
}

/// Byte offset of the `}` closing a reference whose body starts at `body[0]`.
fn matching_close(body: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut chars = body.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch == '$' && chars.peek().is_some_and(|(_, next)| *next == '{') {
            chars.next();
            depth = depth.saturating_add(1);
        } else if ch == CLOSE {
            if depth == 0 {
                return Some(idx);
            }
            depth = depth.saturating_sub(1);
        }
    }
    None
}
