/// Represents ways to locate an element on a web page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Select by ARIA role (explicit or implicit) and optional accessible name
    Role {
        role: String,
        name: Option<String>,
        exact: bool,
    },
    /// Select an input by its placeholder text
    Placeholder(String),
    /// Select using a CSS selector
    Css(String),
    /// Select by visible text content
    Text(String),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Selector::Role {
            role: role.into(),
            name: Some(name.into()),
            exact: false,
        }
    }

    /// Role selector without a name constraint, e.g. the only searchbox on the page.
    pub fn any_role(role: impl Into<String>) -> Self {
        Selector::Role {
            role: role.into(),
            name: None,
            exact: false,
        }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Selector::Placeholder(text.into())
    }

    pub fn css(query: impl Into<String>) -> Self {
        Selector::Css(query.into())
    }

    /// Require the accessible name to match exactly (after whitespace normalisation).
    pub fn exact(self) -> Self {
        match self {
            Selector::Role { role, name, .. } => Selector::Role {
                role,
                name,
                exact: true,
            },
            other => other,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Role {
                role,
                name: Some(name),
                exact,
            } => {
                let marker = if *exact { " (exact)" } else { "" };
                write!(f, "role:{role}|{name}{marker}")
            }
            Selector::Role { role, name: None, .. } => write!(f, "role:{role}"),
            Selector::Placeholder(text) => write!(f, "placeholder:{text}"),
            Selector::Css(query) => write!(f, "css:{query}"),
            Selector::Text(text) => write!(f, "text:{text}"),
            Selector::Invalid(reason) => write!(f, "invalid:{reason}"),
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();

        // role|name is the precise format
        if let Some((role_part, name_part)) = s.split_once('|') {
            let role = role_part.trim();
            let role = role.strip_prefix("role:").unwrap_or(role).to_string();
            let name = name_part.trim();
            let name = name.strip_prefix("name:").unwrap_or(name).to_string();
            if role.is_empty() || name.is_empty() {
                return Selector::Invalid(format!("Empty role or name in selector: \"{s}\""));
            }
            return Selector::Role {
                role,
                name: Some(name),
                exact: false,
            };
        }

        match s {
            _ if s.starts_with("role:") => Selector::any_role(&s[5..]),
            "button" | "link" | "textbox" | "searchbox" | "option" | "combobox" | "menuitem" => {
                Selector::any_role(s)
            }
            _ if s.to_lowercase().starts_with("placeholder:") => {
                Selector::Placeholder(s["placeholder:".len()..].to_string())
            }
            _ if s.starts_with("css:") => Selector::Css(s[4..].to_string()),
            _ if s.starts_with("text:") => Selector::Text(s[5..].to_string()),
            _ if s.starts_with('#') || s.starts_with('.') => Selector::Css(s.to_string()),
            _ => Selector::Invalid(format!(
                "Unknown selector format: \"{s}\". Use prefixes like 'role:', 'placeholder:', 'css:', 'text:' or a '#id'."
            )),
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}
