//! Persisted settings file (§6 External Interfaces, "Persisted state").
//!
//! A small INI-style `key=value` file, one section per role, read and
//! written with a hand-rolled parser rather than pulling in a new
//! serialization crate for a handful of scalar fields.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::CoreError;

/// One `[section]` of key/value pairs, preserving insertion order
/// within a section only insofar as `BTreeMap` orders by key — good
/// enough for a handful of named fields that are read back by name,
/// not position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn parse(text: &str) -> Self {
        let mut doc = Self::new();
        let mut current_section = String::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                current_section = name.trim().to_string();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                doc.set(&current_section, key.trim(), value.trim());
            }
        }
        doc
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (section, kv) in &self.sections {
            out.push('[');
            out.push_str(section);
            out.push_str("]\n");
            for (key, value) in kv {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(CoreError::FileIO(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        std::fs::write(path, self.render()).map_err(CoreError::FileIO)
    }
}

/// `[relay]` section: `ip`, `port`, `server_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySettings {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub server_id: Option<u32>,
}

impl RelaySettings {
    pub fn from_doc(doc: &IniDocument) -> Self {
        Self {
            ip: doc.get("relay", "ip").map(str::to_string),
            port: doc.get("relay", "port").and_then(|v| v.parse().ok()),
            server_id: doc.get("relay", "server_id").and_then(|v| v.parse().ok()),
        }
    }

    pub fn write_to(&self, doc: &mut IniDocument) {
        if let Some(ip) = &self.ip {
            doc.set("relay", "ip", ip.clone());
        }
        if let Some(port) = self.port {
            doc.set("relay", "port", port.to_string());
        }
        if let Some(id) = self.server_id {
            doc.set("relay", "server_id", id.to_string());
        }
    }
}

/// `[client]` section: `server_id`, `last_partner_id`,
/// `last_direct_partner_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_id: Option<u32>,
    pub last_partner_id: Option<u32>,
    pub last_direct_partner_id: Option<u32>,
}

impl ClientSettings {
    pub fn from_doc(doc: &IniDocument) -> Self {
        Self {
            server_id: doc.get("client", "server_id").and_then(|v| v.parse().ok()),
            last_partner_id: doc
                .get("client", "last_partner_id")
                .and_then(|v| v.parse().ok()),
            last_direct_partner_id: doc
                .get("client", "last_direct_partner_id")
                .and_then(|v| v.parse().ok()),
        }
    }

    pub fn write_to(&self, doc: &mut IniDocument) {
        if let Some(id) = self.server_id {
            doc.set("client", "server_id", id.to_string());
        }
        if let Some(id) = self.last_partner_id {
            doc.set("client", "last_partner_id", id.to_string());
        }
        if let Some(id) = self.last_direct_partner_id {
            doc.set("client", "last_direct_partner_id", id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_round_trip() {
        let text = "[relay]\nip=127.0.0.1\nport=7979\nserver_id=42\n";
        let doc = IniDocument::parse(text);
        assert_eq!(doc.get("relay", "ip"), Some("127.0.0.1"));
        let settings = RelaySettings::from_doc(&doc);
        assert_eq!(settings.port, Some(7979));
        assert_eq!(settings.server_id, Some(42));
    }

    #[test]
    fn client_settings_round_trip_through_document() {
        let settings = ClientSettings {
            server_id: Some(1),
            last_partner_id: Some(2),
            last_direct_partner_id: None,
        };
        let mut doc = IniDocument::new();
        settings.write_to(&mut doc);
        let rendered = doc.render();
        let reparsed = IniDocument::parse(&rendered);
        let roundtripped = ClientSettings::from_doc(&reparsed);
        assert_eq!(roundtripped.server_id, Some(1));
        assert_eq!(roundtripped.last_partner_id, Some(2));
        assert_eq!(roundtripped.last_direct_partner_id, None);
    }

    #[test]
    fn missing_file_loads_as_empty_document() {
        let doc = IniDocument::load(Path::new("/nonexistent/path/settings.ini")).unwrap();
        assert_eq!(doc, IniDocument::new());
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "; a comment\n\n[client]\n# another comment\nserver_id=7\n";
        let doc = IniDocument::parse(text);
        assert_eq!(doc.get("client", "server_id"), Some("7"));
    }
}
