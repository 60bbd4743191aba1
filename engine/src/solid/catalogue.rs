//! Primitive Catalogue
//!
//! The catalogue is a text description of the available primitive types and their
//! named parameters. The engine's own catalogue lives as comment lines at the top
//! of `clay_field.wgsl`, next to the distance functions it describes:
//!
//! ```text
//! // MAXTHREADS 64
//! // label: Cube, x: round 0.0
//! // label: Torus, x: thickness 0.5
//! ```
//!
//! A line is an entry only when it contains `label: ` and has exactly one `//`
//! comment marker (lines commented out twice are skipped). Parse failures leave an
//! empty catalogue and log an error; they never abort the engine.

use glam::Vec4;

/// Catalogue text shipped with the engine.
pub const BUILTIN_CATALOGUE: &str = include_str!("../../shaders/clay_field.wgsl");

/// One named primitive parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveParam {
    /// Attribute slot name: x, y, z (attrs) or x2, y2, z2, w2 (attrs2)
    pub slot: String,
    pub label: String,
    pub default: f32,
}

impl PrimitiveParam {
    /// (vector index, component) for the slot, `None` for unknown slots.
    /// `attrs.w` is reserved for flag bits and is never a parameter slot.
    pub fn slot_index(&self) -> Option<(usize, usize)> {
        match self.slot.as_str() {
            "x" => Some((0, 0)),
            "y" => Some((0, 1)),
            "z" => Some((0, 2)),
            "x2" => Some((1, 0)),
            "y2" => Some((1, 1)),
            "z2" => Some((1, 2)),
            "w2" => Some((1, 3)),
            _ => None,
        }
    }
}

/// A primitive type: its label and parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveType {
    pub label: String,
    pub params: Vec<PrimitiveParam>,
}

/// Parsed primitive catalogue.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalogue {
    pub types: Vec<PrimitiveType>,
    /// Declared maximum parallel threads of the evaluating kernels
    pub max_threads: Option<u32>,
}

#[derive(Debug)]
struct ParseError(String);

impl Catalogue {
    /// The catalogue embedded in the field shader.
    pub fn builtin() -> Self {
        Self::parse(BUILTIN_CATALOGUE)
    }

    /// Parse catalogue text. Returns an empty catalogue (and logs) on failure.
    pub fn parse(content: &str) -> Self {
        match Self::try_parse(content) {
            Ok(catalogue) => {
                log::debug!("[Catalogue] parsed {} primitive types", catalogue.types.len());
                catalogue
            }
            Err(ParseError(message)) => {
                log::error!("[Catalogue] failed to parse primitive catalogue: {}", message);
                Self::default()
            }
        }
    }

    fn try_parse(content: &str) -> Result<Self, ParseError> {
        let mut catalogue = Catalogue::default();

        for (line_no, line) in content.lines().enumerate() {
            if let Some(pos) = line.find("MAXTHREADS") {
                let digits: String = line[pos + "MAXTHREADS".len()..]
                    .trim_start()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                catalogue.max_threads = digits.parse().ok();
                continue;
            }

            if !line.contains("label: ") {
                continue;
            }
            // Exactly one "//": more slashes means the entry itself is commented out
            if line.split('/').count() != 3 {
                continue;
            }

            let rest = line
                .split("label:")
                .nth(1)
                .ok_or_else(|| ParseError(format!("line {}: missing label", line_no + 1)))?;
            let mut items = rest.split(',');
            let label = items.next().unwrap_or("").trim();
            if label.is_empty() {
                return Err(ParseError(format!("line {}: empty label", line_no + 1)));
            }

            let mut params = Vec::new();
            for item in items {
                let (slot, value) = item.split_once(':').ok_or_else(|| {
                    ParseError(format!("line {}: parameter '{}' has no slot", line_no + 1, item.trim()))
                })?;
                let mut words = value.split_whitespace();
                let (Some(param_label), Some(default)) = (words.next(), words.next()) else {
                    return Err(ParseError(format!(
                        "line {}: parameter '{}' needs a label and a default",
                        line_no + 1,
                        item.trim()
                    )));
                };
                let default: f32 = default.parse().map_err(|_| {
                    ParseError(format!(
                        "line {}: default '{}' is not a number",
                        line_no + 1,
                        default
                    ))
                })?;
                params.push(PrimitiveParam {
                    slot: slot.trim().to_string(),
                    label: param_label.to_string(),
                    default,
                });
            }

            catalogue.types.push(PrimitiveType {
                label: label.to_string(),
                params,
            });
        }

        Ok(catalogue)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Labels in catalogue order (index = primitive id).
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.label.as_str())
    }

    /// Primitive id for a label.
    pub fn find(&self, label: &str) -> Option<u32> {
        self.types
            .iter()
            .position(|t| t.label.eq_ignore_ascii_case(label))
            .map(|i| i as u32)
    }

    /// Default `(attrs, attrs2)` for a primitive type. Unknown ids get zeros.
    pub fn default_attrs(&self, primitive: u32) -> (Vec4, Vec4) {
        let mut attrs = [Vec4::ZERO, Vec4::ZERO];
        if let Some(ty) = self.types.get(primitive as usize) {
            for param in &ty.params {
                if let Some((vector, component)) = param.slot_index() {
                    attrs[vector][component] = param.default;
                }
            }
        }
        (attrs[0], attrs[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogue() {
        let catalogue = Catalogue::builtin();
        let labels: Vec<&str> = catalogue.labels().collect();
        assert_eq!(labels, vec!["Cube", "Sphere", "Cylinder", "Torus", "Capsule"]);
        assert_eq!(catalogue.max_threads, Some(64));
        assert_eq!(catalogue.find("torus"), Some(3));
        let (attrs, _) = catalogue.default_attrs(3);
        assert_eq!(attrs.x, 0.5);
    }

    #[test]
    fn test_parse_params_and_slots() {
        let text = "// label: Blob, x: round 0.25, x2: twist 1.5\n";
        let catalogue = Catalogue::parse(text);
        assert_eq!(catalogue.len(), 1);
        let ty = &catalogue.types[0];
        assert_eq!(ty.label, "Blob");
        assert_eq!(ty.params[1].slot, "x2");
        assert_eq!(ty.params[1].label, "twist");
        let (attrs, attrs2) = catalogue.default_attrs(0);
        assert_eq!(attrs.x, 0.25);
        assert_eq!(attrs2.x, 1.5);
        assert_eq!(attrs.w, 0.0);
    }

    #[test]
    fn test_commented_out_entries_skipped() {
        let text = "// label: Kept\n//// label: Dropped\n// no entry here\n";
        let catalogue = Catalogue::parse(text);
        let labels: Vec<&str> = catalogue.labels().collect();
        assert_eq!(labels, vec!["Kept"]);
    }

    #[test]
    fn test_malformed_yields_empty() {
        let text = "// label: Good\n// label: Bad, x: round notanumber\n";
        let catalogue = Catalogue::parse(text);
        assert!(catalogue.is_empty());
        assert_eq!(catalogue.max_threads, None);
    }

    #[test]
    fn test_unknown_primitive_defaults() {
        let catalogue = Catalogue::builtin();
        assert_eq!(catalogue.default_attrs(99), (Vec4::ZERO, Vec4::ZERO));
    }
}
