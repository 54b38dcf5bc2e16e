use super::types::ClassId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub color: [u8; 3],
}

/// Read-only mapping from class ID to display name and overlay color.
///
/// Per-render color changes go through [`CompositeOptions::color_overrides`]
/// rather than by editing a palette.
///
/// [`CompositeOptions::color_overrides`]: crate::composite::CompositeOptions::color_overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPalette {
    classes: BTreeMap<ClassId, ClassInfo>,
}

const PASCAL_VOC: [(&str, [u8; 3]); 21] = [
    ("background", [0, 0, 0]),
    ("aeroplane", [128, 0, 0]),
    ("bicycle", [0, 128, 0]),
    ("bird", [128, 128, 0]),
    ("boat", [0, 0, 128]),
    ("bottle", [128, 0, 128]),
    ("bus", [0, 128, 128]),
    ("car", [128, 128, 128]),
    ("cat", [64, 0, 0]),
    ("chair", [192, 0, 0]),
    ("cow", [64, 128, 0]),
    ("dining table", [192, 128, 0]),
    ("dog", [64, 0, 128]),
    ("horse", [192, 0, 128]),
    ("motorbike", [64, 128, 128]),
    ("person", [192, 128, 128]),
    ("potted plant", [0, 64, 0]),
    ("sheep", [128, 64, 0]),
    ("sofa", [0, 192, 0]),
    ("train", [128, 192, 0]),
    ("tv monitor", [0, 64, 128]),
];

impl ClassPalette {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ClassId, S, [u8; 3])>,
        S: Into<String>,
    {
        let classes = entries
            .into_iter()
            .map(|(id, name, color)| (id, ClassInfo { name: name.into(), color }))
            .collect();
        Self { classes }
    }

    /// The 21-class PASCAL VOC palette.
    pub fn pascal_voc() -> Self {
        Self::from_entries(
            PASCAL_VOC
                .iter()
                .enumerate()
                .map(|(id, (name, color))| (id as ClassId, *name, *color)),
        )
    }

    /// Background plus a single foreground class, for binary masks.
    pub fn binary(color: [u8; 3]) -> Self {
        Self::from_entries([(0, "background", [0, 0, 0]), (1, "foreground", color)])
    }

    pub fn get(&self, class: ClassId) -> Option<&ClassInfo> {
        self.classes.get(&class)
    }

    pub fn contains(&self, class: ClassId) -> bool {
        self.classes.contains_key(&class)
    }

    pub fn name(&self, class: ClassId) -> Option<&str> {
        self.get(class).map(|info| info.name.as_str())
    }

    /// Color for `class`, taking a per-call override first.
    pub fn color(&self, class: ClassId, overrides: &BTreeMap<ClassId, [u8; 3]>) -> Option<[u8; 3]> {
        overrides
            .get(&class)
            .copied()
            .or_else(|| self.get(class).map(|info| info.color))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ClassPalette {
    fn default() -> Self {
        Self::pascal_voc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_palette() {
        let palette = ClassPalette::pascal_voc();
        assert_eq!(palette.len(), 21);
        assert_eq!(palette.name(15), Some("person"));
        assert_eq!(palette.get(15).map(|c| c.color), Some([192, 128, 128]));
        assert!(!palette.contains(21));
    }

    #[test]
    fn test_override_does_not_touch_palette() {
        let palette = ClassPalette::binary([255, 0, 0]);
        let mut overrides = BTreeMap::new();
        overrides.insert(1, [0, 0, 255]);

        assert_eq!(palette.color(1, &overrides), Some([0, 0, 255]));
        assert_eq!(palette.color(1, &BTreeMap::new()), Some([255, 0, 0]));
        assert_eq!(palette.color(7, &BTreeMap::new()), None);
    }
}
