//! Cache key derivation.
//!
//! A key names exactly one persisted page image and is fully deterministic:
//! same document, page, and page geometry always produce the same file
//! name. The aspect signature folds the page's width/height ratio into the
//! name so entries rendered for a different geometry are simply never
//! found again rather than served stale.

/// Page aspect ratio reduced by gcd, e.g. 612x792 becomes 17x22.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectSignature {
    width: u32,
    height: u32,
}

impl AspectSignature {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let divisor = gcd(width, height);

        Self { width: width / divisor, height: height / divisor }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Deterministic identifier for one page's persisted raster image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    document: String,
    page_index: u32,
    aspect: AspectSignature,
}

impl CacheKey {
    pub fn new(document: impl Into<String>, page_index: u32, aspect: AspectSignature) -> Self {
        Self { document: document.into(), page_index, aspect }
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    /// File name of the entry inside the cache directory.
    pub fn file_name(&self) -> String {
        let document: String = self
            .document
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
            .collect();

        format!(
            "{document}_{index}_{w}x{h}.png",
            index = self.page_index,
            w = self.aspect.width,
            h = self.aspect.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_signature_is_gcd_reduced() {
        let aspect = AspectSignature::new(612, 792);
        assert_eq!((aspect.width(), aspect.height()), (17, 22));

        let square = AspectSignature::new(500, 500);
        assert_eq!((square.width(), square.height()), (1, 1));
    }

    #[test]
    fn aspect_signature_tolerates_zero_dimensions() {
        let aspect = AspectSignature::new(0, 792);
        assert_eq!((aspect.width(), aspect.height()), (1, 792));
    }

    #[test]
    fn file_name_is_deterministic() {
        let a = CacheKey::new("doc.pdf", 3, AspectSignature::new(612, 792));
        let b = CacheKey::new("doc.pdf", 3, AspectSignature::new(612, 792));

        assert_eq!(a.file_name(), b.file_name());
        assert_eq!(a.file_name(), "doc.pdf_3_17x22.png");
    }

    #[test]
    fn file_name_changes_with_geometry() {
        let portrait = CacheKey::new("doc.pdf", 0, AspectSignature::new(612, 792));
        let landscape = CacheKey::new("doc.pdf", 0, AspectSignature::new(792, 612));

        assert_ne!(portrait.file_name(), landscape.file_name());
    }

    #[test]
    fn file_name_sanitizes_path_separators() {
        let key = CacheKey::new("a/b\\c.pdf", 0, AspectSignature::new(1, 1));
        assert!(!key.file_name().contains('/'));
        assert!(!key.file_name().contains('\\'));
    }
}
