use std::fmt;

use serde_json::Value;

use crate::painter::PainterConfig;

/// Content digest of a painter configuration, the dedup key for running shows.
///
/// Two configurations get the same fingerprint iff their canonical (key sorted) JSON forms are
/// byte identical. `Unset` stands for "no configuration" and never equals a real digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Unset,
    Digest([u8; 16]),
}

impl Fingerprint {
    pub fn of(config: Option<&PainterConfig>) -> Fingerprint {
        match config {
            Some(config) => Fingerprint::of_value(config.as_value()),
            None => Fingerprint::Unset,
        }
    }

    pub fn of_value(value: &Value) -> Fingerprint {
        let mut canonical = String::new();
        write_canonical(value, &mut canonical);
        Fingerprint::Digest(md5::compute(canonical.as_bytes()).0)
    }

    #[cfg(test)]
    pub fn is_set(&self) -> bool {
        matches!(self, Fingerprint::Digest(_))
    }
}

/// JSON with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Unset => f.write_str("unset"),
            Fingerprint::Digest(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}
