use anyhow::Result;

use crate::service::RemoteWiki;

pub const FUNCTION_NAME: &str = "#remote_version";

#[derive(Debug, Clone, PartialEq, Eq)]
struct FunctionCall<'a> {
    args: Vec<&'a str>,
    consumed: usize,
}

/// Replaces every `{{#remote_version: endpoint | type}}` in `text` with its
/// rendered value. Other text, other templates and unterminated calls are
/// copied through unchanged.
pub fn expand_remote_version(text: &str, remote: &mut RemoteWiki) -> Result<String> {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match parse_call(candidate) {
            Some(call) => {
                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    args.push(expand_remote_version(arg, remote)?);
                }
                let endpoint = args.first().map(|arg| arg.trim()).unwrap_or("");
                let kind = args.get(1).map(|arg| arg.trim());
                output.push_str(&remote.remote_version(endpoint, kind)?);
                rest = &candidate[call.consumed..];
            }
            None => {
                output.push_str("{{");
                rest = &candidate[2..];
            }
        }
    }
    output.push_str(rest);
    Ok(output)
}

fn parse_call(text: &str) -> Option<FunctionCall<'_>> {
    let body = text.strip_prefix("{{")?;
    let name_start = body.len() - body.trim_start().len();
    let named = &body[name_start..];
    let name = named.get(..FUNCTION_NAME.len())?;
    if !name.eq_ignore_ascii_case(FUNCTION_NAME) {
        return None;
    }
    let after_name = &named[FUNCTION_NAME.len()..];
    let (args_text, separator) = match after_name.strip_prefix(':') {
        Some(args_text) => (args_text, 1),
        None => (after_name, 0),
    };
    let end = find_closing(args_text)?;
    let args = if separator == 0 {
        // `{{#remote_version}}` is a call without arguments.
        if !args_text[..end].trim().is_empty() {
            return None;
        }
        Vec::new()
    } else {
        split_top_level(&args_text[..end])
    };
    Some(FunctionCall {
        args,
        consumed: 2 + name_start + FUNCTION_NAME.len() + separator + end + 2,
    })
}

/// Byte offset of the `}}` closing the current call, skipping nested `{{ }}`.
fn find_closing(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut index = 0usize;
    while index + 1 < bytes.len() {
        match (bytes[index], bytes[index + 1]) {
            (b'{', b'{') => {
                depth += 1;
                index += 2;
            }
            (b'}', b'}') => {
                if depth == 0 {
                    return Some(index);
                }
                depth -= 1;
                index += 2;
            }
            _ => index += 1,
        }
    }
    None
}

fn split_top_level(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index..].starts_with(b"{{") {
            depth += 1;
            index += 2;
            continue;
        }
        if bytes[index..].starts_with(b"}}") {
            depth = depth.saturating_sub(1);
            index += 2;
            continue;
        }
        if bytes[index] == b'|' && depth == 0 {
            parts.push(&text[start..index]);
            start = index + 1;
        }
        index += 1;
    }
    parts.push(&text[start..]);
    parts
}
