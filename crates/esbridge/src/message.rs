//! # Diagnostic Messages
//!
//! The `{id, pluginName, text, location, notes, detail}` records the engine
//! attaches to every result and every failure. Decoding is lenient: a missing
//! or mistyped field falls back to its default, since messages are for humans
//! and a half-filled one is still more useful than a protocol error.

use espack::Map;
use espack::Value;

/// A source position a message points at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub file: String,
    pub namespace: String,
    /// 1-based.
    pub line: i32,
    /// 0-based, in bytes.
    pub column: i32,
    pub length: i32,
    pub line_text: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub text: String,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: String,
    pub plugin_name: String,
    pub text: String,
    pub location: Option<Location>,
    pub notes: Vec<Note>,
    /// Opaque to the bridge, carried back and forth untouched.
    pub detail: Value,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    pub fn with_plugin(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = plugin_name.into();
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_note(mut self, text: impl Into<String>) -> Self {
        self.notes.push(Note { text: text.into(), location: None });
        self
    }

    pub fn to_value(&self) -> Value {
        Map::new()
            .with("id", self.id.as_str())
            .with("pluginName", self.plugin_name.as_str())
            .with("text", self.text.as_str())
            .with("location", self.location.as_ref().map(Location::to_value))
            .with("notes", self.notes.iter().map(Note::to_value).collect::<Vec<_>>())
            .with("detail", self.detail.clone())
            .into()
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_map() else {
            return Self::new(value.as_str().unwrap_or_default());
        };
        Self {
            id: string(map, "id"),
            plugin_name: string(map, "pluginName"),
            text: string(map, "text"),
            location: map.get("location").and_then(Location::from_value),
            notes: map
                .get_array("notes")
                .unwrap_or_default()
                .iter()
                .map(Note::from_value)
                .collect(),
            detail: map.get("detail").cloned().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.plugin_name.is_empty() {
            write!(f, "[plugin {}] ", self.plugin_name)?;
        }
        if let Some(loc) = &self.location {
            write!(f, "{}:{}:{}: ", loc.file, loc.line, loc.column)?;
        }
        write!(f, "{}", self.text)
    }
}

impl Location {
    pub fn to_value(&self) -> Value {
        Map::new()
            .with("file", self.file.as_str())
            .with("namespace", self.namespace.as_str())
            .with("line", self.line)
            .with("column", self.column)
            .with("length", self.length)
            .with("lineText", self.line_text.as_str())
            .with("suggestion", self.suggestion.as_str())
            .into()
    }

    /// `None` for a null location.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        Some(Self {
            file: string(map, "file"),
            namespace: string(map, "namespace"),
            line: map.get_int("line").unwrap_or_default(),
            column: map.get_int("column").unwrap_or_default(),
            length: map.get_int("length").unwrap_or_default(),
            line_text: string(map, "lineText"),
            suggestion: string(map, "suggestion"),
        })
    }
}

impl Note {
    pub fn to_value(&self) -> Value {
        Map::new()
            .with("text", self.text.as_str())
            .with("location", self.location.as_ref().map(Location::to_value))
            .into()
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_map() else {
            return Self::default();
        };
        Self {
            text: string(map, "text"),
            location: map.get("location").and_then(Location::from_value),
        }
    }
}

fn string(map: &Map, key: &str) -> String {
    map.get_str(key).unwrap_or_default().to_string()
}

/// Encodes a message list as a wire array.
pub fn to_array(messages: &[Message]) -> Value {
    Value::Array(messages.iter().map(Message::to_value).collect())
}

/// Reads the message array stored under `key`, empty if absent.
pub fn from_field(map: &Map, key: &str) -> Vec<Message> {
    map.get_array(key)
        .unwrap_or_default()
        .iter()
        .map(Message::from_value)
        .collect()
}
