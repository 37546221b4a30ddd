/// Represents ways to locate a node in the target form's DOM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Select by CSS selector
    Css(String),
    /// Select by DOM id (stable server-generated identifier)
    DomId(String),
    /// Select by visible text content
    Text(String),
    /// Select using an XPath query
    XPath(String),
    /// Select the n-th currently attached instance of a repeating widget
    /// class. Used for fields that only materialize after an earlier
    /// field's selection, where the ordinal depends on form state.
    NthOfClass { class: String, index: usize },
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    /// Short human-readable form used in progress events and error detail.
    pub fn describe(&self) -> String {
        match self {
            Selector::Css(css) => format!("css:{css}"),
            Selector::DomId(id) => format!("#{id}"),
            Selector::Text(t) => format!("text:{t}"),
            Selector::XPath(p) => format!("xpath:{p}"),
            Selector::NthOfClass { class, index } => format!("nth:{class}:{index}"),
            Selector::Invalid(reason) => format!("invalid:{reason}"),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        match s {
            _ if s.starts_with('#') => Selector::DomId(s[1..].to_string()),
            _ if s.starts_with("id:") => Selector::DomId(s[3..].to_string()),
            _ if s.starts_with("css:") => Selector::Css(s[4..].to_string()),
            _ if s.starts_with("text:") => Selector::Text(s[5..].to_string()),
            _ if s.starts_with("xpath:") => Selector::XPath(s[6..].to_string()),
            _ if s.starts_with('/') => Selector::XPath(s.to_string()),
            _ if s.starts_with("nth:") => {
                let rest = &s[4..];
                match rest.rsplit_once(':') {
                    Some((class, idx)) => match idx.parse::<usize>() {
                        Ok(index) => Selector::NthOfClass {
                            class: class.to_string(),
                            index,
                        },
                        Err(_) => {
                            Selector::Invalid(format!("invalid index in nth selector: '{idx}'"))
                        }
                    },
                    None => Selector::Invalid(format!("nth selector missing index: '{rest}'")),
                }
            }
            _ if s.starts_with('.') => Selector::Css(s.to_string()),
            _ => Selector::Invalid(format!(
                "Unknown selector format: \"{s}\". Use prefixes like 'css:', 'id:', 'text:', 'xpath:' or 'nth:' to specify the selector type."
            )),
        }
    }
}
