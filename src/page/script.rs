//! Page-script generation.
//!
//! Every script is a self-contained expression that evaluates to a plain
//! JSON value and never throws into the caller: missing DOM structure shows
//! up as `false` (or `0`), not as an exception.

/// Encodes a Rust string as a JavaScript string literal.
fn js_string(value: &str) -> String {
    // JSON string syntax is valid JS, and escapes quotes, backslashes and
    // control characters. U+2028/U+2029 are legal in JSON but not in older
    // JS string literals.
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Writes `text` into the field matched by `selector` and provokes the page's
/// save-on-blur handling.
///
/// The value goes through the prototype's native setter so frameworks that
/// wrap `value` still observe the change, followed by `input`/`change` events
/// and a blur. Evaluates to `true` when the field was found.
pub fn injection_script(selector: &str, text: &str) -> String {
    format!(
        r#"(function () {{
    try {{
        var field = document.querySelector({selector});
        if (!field) {{
            return false;
        }}
        var proto = (typeof HTMLTextAreaElement !== 'undefined' && field instanceof HTMLTextAreaElement)
            ? HTMLTextAreaElement.prototype
            : HTMLInputElement.prototype;
        var descriptor = Object.getOwnPropertyDescriptor(proto, 'value');
        var setValue = function (v) {{
            if (descriptor && descriptor.set) {{
                descriptor.set.call(field, v);
            }} else {{
                field.value = v;
            }}
        }};
        field.focus();
        setValue('');
        setValue({text});
        field.dispatchEvent(new Event('input', {{ bubbles: true, cancelable: true }}));
        field.dispatchEvent(new Event('change', {{ bubbles: true }}));
        field.blur();
        field.dispatchEvent(new FocusEvent('focusout', {{ bubbles: true, cancelable: true }}));
        return true;
    }} catch (e) {{
        return false;
    }}
}})()"#,
        selector = js_string(selector),
        text = js_string(text),
    )
}

/// Sends an ArrowRight key press to the document so the page's own
/// keyboard navigation advances to the next item.
pub fn navigation_script() -> String {
    r#"(function () {
    try {
        if (document.activeElement && document.activeElement !== document.body) {
            document.activeElement.blur();
        }
        var init = { key: 'ArrowRight', code: 'ArrowRight', keyCode: 39, which: 39, bubbles: true, cancelable: true };
        document.dispatchEvent(new KeyboardEvent('keydown', init));
        document.dispatchEvent(new KeyboardEvent('keyup', init));
        return true;
    } catch (e) {
        return false;
    }
})()"#
        .to_string()
}

/// Evaluates to the number of elements matching `selector`.
pub fn count_script(selector: &str) -> String {
    format!(
        r#"(function () {{
    try {{
        return document.querySelectorAll({selector}).length;
    }} catch (e) {{
        return 0;
    }}
}})()"#,
        selector = js_string(selector),
    )
}

/// Evaluates to `document.readyState`.
pub fn ready_state_script() -> String {
    "document.readyState".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("plain"), "\"plain\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(js_string("back\\slash"), "\"back\\\\slash\"");
        assert_eq!(js_string("line\nbreak"), "\"line\\nbreak\"");
        assert_eq!(js_string("sep\u{2028}"), "\"sep\\u2028\"");
    }

    #[test]
    fn test_injection_script_embeds_literals() {
        let script = injection_script(r#"textarea[data-testid="autogrow-textarea"]"#, "zoe99");
        assert!(script.contains(r#"document.querySelector("textarea[data-testid=\"autogrow-textarea\"]")"#));
        assert!(script.contains(r#"setValue("zoe99");"#));
        assert!(script.contains("field.blur();"));
        assert!(script.contains("return false;"));
    }

    #[test]
    fn test_injection_script_cannot_break_out() {
        // Backticks and template syntax are inert inside a JSON string literal
        let script = injection_script("textarea", "`${alert(1)}`\"); evil(); (\"");
        assert!(script.contains(r#"setValue("`${alert(1)}`\"); evil(); (\"");"#));
    }

    #[test]
    fn test_navigation_script_uses_arrow_right() {
        let script = navigation_script();
        assert!(script.contains("'ArrowRight'"));
        assert!(script.contains("keyCode: 39"));
    }

    #[test]
    fn test_count_script() {
        let script = count_script(r#"[data-testid="notification"]"#);
        assert!(script.contains(r#"querySelectorAll("[data-testid=\"notification\"]")"#));
    }
}
