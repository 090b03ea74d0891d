//! Page-side scripts used to resolve and act on elements.

use serde_json::{json, Value};

use crate::{ExportError, Selector};

/// Resolves a selector description to the first visible matching element, or
/// `null`. An exact accessible-name hit always wins over a substring hit.
const FIND_ELEMENT_FN: &str = r#"(function (sel) {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const visible = (el) => {
    if (!el.isConnected) return false;
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
  };
  const ROLE_QUERIES = {
    button: 'button, [role="button"], input[type="button"], input[type="submit"], input[type="reset"]',
    link: 'a[href], [role="link"]',
    textbox: 'input:not([type]), input[type="text"], input[type="email"], input[type="password"], input[type="tel"], input[type="url"], textarea, [role="textbox"]',
    searchbox: 'input[type="search"], [role="searchbox"]',
    option: 'option, [role="option"]',
    combobox: 'select, [role="combobox"]',
    menuitem: '[role="menuitem"]',
  };
  const accessibleName = (el) => {
    const labelledBy = el.getAttribute('aria-labelledby');
    if (labelledBy) {
      const text = labelledBy.split(/\s+/)
        .map((id) => document.getElementById(id))
        .filter(Boolean)
        .map((node) => node.textContent)
        .join(' ');
      if (norm(text)) return norm(text);
    }
    const aria = norm(el.getAttribute('aria-label'));
    if (aria) return aria;
    if (el.labels && el.labels.length) {
      return norm(Array.from(el.labels).map((l) => l.textContent).join(' '));
    }
    if (el.tagName === 'INPUT' && ['button', 'submit', 'reset'].includes(el.type)) {
      return norm(el.value);
    }
    const text = norm(el.innerText || el.textContent);
    if (text) return text;
    return norm(el.getAttribute('title') || el.getAttribute('placeholder'));
  };

  let candidates = [];
  let nameOf = accessibleName;
  let wanted = null;
  let exact = false;
  switch (sel.kind) {
    case 'role': {
      const query = ROLE_QUERIES[sel.role] || `[role="${sel.role}"]`;
      candidates = Array.from(document.querySelectorAll(query));
      wanted = sel.name;
      exact = sel.exact;
      break;
    }
    case 'placeholder':
      candidates = Array.from(document.querySelectorAll('[placeholder]'));
      nameOf = (el) => norm(el.getAttribute('placeholder'));
      wanted = sel.value;
      break;
    case 'css':
      candidates = Array.from(document.querySelectorAll(sel.value));
      break;
    case 'text': {
      const needle = norm(sel.value).toLowerCase();
      const holds = (el) => norm(el.textContent).toLowerCase().includes(needle);
      candidates = Array.from(document.querySelectorAll('body *'))
        .filter((el) => holds(el) && !Array.from(el.children).some(holds));
      break;
    }
  }

  candidates = candidates.filter(visible);
  if (wanted === null || wanted === undefined) return candidates[0] || null;

  const target = norm(wanted);
  const named = candidates.map((el) => [el, nameOf(el)]);
  let hit = named.find(([, name]) => name === target);
  if (!hit && !exact) {
    hit = named.find(([, name]) => name.toLowerCase().includes(target.toLowerCase()));
  }
  return hit ? hit[0] : null;
})"#;

/// Scrolls the element to the middle of the viewport and returns its centre.
pub const CLICK_POINT_FN: &str = r#"function () {
  this.scrollIntoView({ block: 'center', inline: 'center' });
  const rect = this.getBoundingClientRect();
  return { x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };
}"#;

/// Sets the value through the native setter so framework listeners see it.
pub const FILL_FN: &str = r#"function (value) {
  this.focus();
  if (this instanceof HTMLInputElement || this instanceof HTMLTextAreaElement) {
    const proto = this instanceof HTMLTextAreaElement
      ? HTMLTextAreaElement.prototype
      : HTMLInputElement.prototype;
    Object.getOwnPropertyDescriptor(proto, 'value').set.call(this, value);
  } else if (this.isContentEditable) {
    this.textContent = value;
  } else {
    throw new Error('Element is not an <input>, <textarea> or contenteditable');
  }
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

pub const FOCUS_FN: &str = r#"function () { this.focus(); }"#;

fn describe(selector: &Selector) -> Result<Value, ExportError> {
    let description = match selector {
        Selector::Role { role, name, exact } => json!({
            "kind": "role",
            "role": role.to_lowercase(),
            "name": name,
            "exact": exact,
        }),
        Selector::Placeholder(text) => json!({ "kind": "placeholder", "value": text }),
        Selector::Css(query) => json!({ "kind": "css", "value": query }),
        Selector::Text(text) => json!({ "kind": "text", "value": text }),
        Selector::Invalid(reason) => return Err(ExportError::InvalidSelector(reason.clone())),
    };
    Ok(description)
}

/// Expression evaluating to the element `selector` points at, or `null`.
pub fn find_expression(selector: &Selector) -> Result<String, ExportError> {
    Ok(format!("{FIND_ELEMENT_FN}({})", describe(selector)?))
}

/// Key events for one character: a `keyDown` carrying the text and a `keyUp`.
pub fn key_events(ch: char) -> [Value; 2] {
    let key = ch.to_string();
    [
        json!({ "type": "keyDown", "key": key, "text": key, "unmodifiedText": key }),
        json!({ "type": "keyUp", "key": key }),
    ]
}
