// src/config/parse.rs
use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;

pub(crate) type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Parse config text; `hint_ext` picks the format (`toml`, anything else = INI).
pub(crate) fn parse_sections(s: &str, hint_ext: &str) -> Result<Sections> {
    if hint_ext.eq_ignore_ascii_case("toml") {
        parse_toml(s)
    } else {
        parse_ini(s)
    }
}

/// configparser-style INI: `[section]`, `key = value` or `key: value`,
/// `#`/`;` full-line comments, indented continuation lines.
/// Option names are case-insensitive (stored lowercased); section names are not.
fn parse_ini(s: &str) -> Result<Sections> {
    let mut out = Sections::new();
    let mut section: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (idx, raw) in s.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim_end();
        let trimmed = line.trim_start();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        // Continuation of the previous value
        if line.len() != trimmed.len() {
            if let (Some(sec), Some(key)) = (&section, &last_key) {
                if let Some(v) = out.get_mut(sec).and_then(|opts| opts.get_mut(key)) {
                    if !v.is_empty() {
                        v.push('\n');
                    }
                    v.push_str(trimmed);
                    continue;
                }
            }
        }

        if let Some(rest) = trimmed.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .ok_or_else(|| anyhow!("line {lineno}: unterminated section header"))?
                .trim();
            if name.is_empty() {
                bail!("line {lineno}: empty section name");
            }
            if out.contains_key(name) {
                bail!("line {lineno}: duplicate section [{name}]");
            }
            out.insert(name.to_string(), BTreeMap::new());
            section = Some(name.to_string());
            last_key = None;
            continue;
        }

        let Some(sec) = &section else {
            bail!("line {lineno}: option outside of any section");
        };
        let split_at = trimmed
            .find(['=', ':'])
            .ok_or_else(|| anyhow!("line {lineno}: expected `key = value`"))?;
        let key = trimmed[..split_at].trim().to_lowercase();
        let value = trimmed[split_at + 1..].trim().to_string();
        if key.is_empty() {
            bail!("line {lineno}: empty option name");
        }

        let opts = out.entry(sec.clone()).or_default();
        if opts.contains_key(&key) {
            bail!("line {lineno}: duplicate option `{key}` in [{sec}]");
        }
        opts.insert(key.clone(), value);
        last_key = Some(key);
    }

    Ok(out)
}

fn parse_toml(s: &str) -> Result<Sections> {
    let table: toml::Table = toml::from_str(s).context("parse toml")?;
    let mut out = Sections::new();
    for (name, value) in table {
        let toml::Value::Table(opts) = value else {
            bail!("top-level key `{name}` is not inside a [section]");
        };
        let mut section = BTreeMap::new();
        for (key, v) in opts {
            let text = toml_scalar(&v)
                .ok_or_else(|| anyhow!("[{name}] {key}: nested tables are not supported"))?;
            section.insert(key.to_lowercase(), text);
        }
        out.insert(name, section);
    }
    Ok(out)
}

fn toml_scalar(v: &toml::Value) -> Option<String> {
    match v {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .map(toml_scalar)
            .collect::<Option<Vec<_>>>()
            .map(|v| v.join(",")),
        toml::Value::Table(_) => None,
    }
}
