use serde::{Deserialize, Serialize};

/// Named bit of a [FlagCoding].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub name: String,
    pub mask: u64,
    pub description: String,
}

/// Symbolic meaning of the bits of a flag band.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlagCoding {
    pub name: String,
    pub description: String,
    flags: Vec<Flag>,
}

impl FlagCoding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn add_flag(&mut self, name: impl Into<String>, mask: u64, description: impl Into<String>) {
        self.flags.push(Flag {
            name: name.into(),
            mask,
            description: description.into(),
        })
    }

    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.iter().find(|flag| flag.name == name)
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    /// Names of the flags raised in `value`.
    pub fn decode(&self, value: u64) -> Vec<&str> {
        self.flags
            .iter()
            .filter(|flag| value & flag.mask == flag.mask)
            .map(|flag| flag.name.as_str())
            .collect()
    }
}

/// Boolean raster defined by a band-maths expression,
/// e.g. `ndvi_flags.NDVI_ARITHMETIC`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub name: String,
    pub description: String,
    pub expression: String,
    /// RGB overlay color.
    pub color: [u8; 3],
    pub transparency: f64,
}

impl Mask {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        expression: impl Into<String>,
        color: [u8; 3],
        transparency: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            expression: expression.into(),
            color,
            transparency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_lists_raised_flags() {
        let mut coding = FlagCoding::new("ndvi_flags");
        coding.add_flag("ARITHMETIC", 1, "");
        coding.add_flag("NEGATIVE", 2, "");
        coding.add_flag("SATURATION", 4, "");
        assert_eq!(coding.decode(5), vec!["ARITHMETIC", "SATURATION"]);
        assert!(coding.decode(0).is_empty());
        assert_eq!(coding.flag("NEGATIVE").map(|flag| flag.mask), Some(2));
    }
}
