use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};

use crate::{
    components::Product,
    errors::{RasterOpsError, Result},
    registry::{Descriptor, DescriptorRegistry, Qualification},
};

/// Opens files of one format into a [Product].
pub trait ReaderPlugIn: Descriptor<Input = Path> + Debug {
    fn description(&self) -> &str;

    /// Lower-case file extensions this plug-in reads, without leading dot.
    fn extensions(&self) -> &[String];

    fn open(&self, path: &Path) -> Result<Product>;
}

/// Builds the product of a concrete file format.
pub type ProductFactory = Arc<dyn Fn(&Path) -> Result<Product> + Send + Sync>;

/// Reader plug-in qualifying files by name alone.
///
/// With a prefix configured a file must carry both prefix and one of the
/// extensions to be intended for the format, anything else is rejected.
/// Without prefix a matching extension is merely suitable.
#[derive(Clone)]
pub struct FilePatternReaderPlugIn {
    format: String,
    description: String,
    prefix: Option<String>,
    extensions: Vec<String>,
    factory: ProductFactory,
}

impl Debug for FilePatternReaderPlugIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePatternReaderPlugIn")
            .field("format", &self.format)
            .field("prefix", &self.prefix)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl FilePatternReaderPlugIn {
    pub fn new<E: AsRef<str>>(
        format: impl Into<String>,
        extensions: impl IntoIterator<Item = E>,
        factory: ProductFactory,
    ) -> Self {
        let format = format.into();
        Self {
            description: format.clone(),
            format,
            prefix: None,
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            factory,
        }
    }

    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = Some(prefix.as_ref().to_lowercase());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Kompsat-5 products, named `K5_*` with HDF5, GeoTIFF or auxiliary XML extensions.
    pub fn kompsat5(factory: ProductFactory) -> Self {
        Self::new("Kompsat5", ["h5", "tif", "aux.xml"], factory)
            .with_prefix("k5_")
            .with_description("Kompsat-5 Products")
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

impl Descriptor for FilePatternReaderPlugIn {
    type Input = Path;

    fn name(&self) -> &str {
        &self.format
    }

    fn qualification(&self, path: &Path) -> Qualification {
        let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().to_lowercase())
        else {
            return Qualification::Unable;
        };
        let extension_matches = self
            .extensions
            .iter()
            .any(|ext| file_name.ends_with(&format!(".{ext}")));
        match &self.prefix {
            Some(prefix) if extension_matches && file_name.starts_with(prefix) => {
                Qualification::Intended
            }
            None if extension_matches => Qualification::Suitable,
            _ => Qualification::Unable,
        }
    }
}

impl ReaderPlugIn for FilePatternReaderPlugIn {
    fn description(&self) -> &str {
        &self.description
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn open(&self, path: &Path) -> Result<Product> {
        (self.factory)(path)
    }
}

/// Folders inside product layouts that hold parts of a product, never products.
const PART_DIRECTORIES: &[&str] = &[
    ".data",
    "annotation",
    "measurement",
    "auxraster",
    "auxfiles",
    "imagedata",
    "preview",
    "support",
    "quality",
    "source_images",
    "schemas",
];

/// Leaders, trailers and other companions of product files.
const COMPANION_PREFIXES: &[&str] = &[
    "led", "trl", "tra_", "nul", "lea", "dat", "img", "imop", "sarl", "sart", "par_", "dfas",
    "dfdn", "lut", "readme", "l1b_iif", "dor_vor", "imagery_", "browse",
];

/// Documents, archives, previews and sidecars found next to products.
const COMPANION_EXTENSIONS: &[&str] = &[
    "pix", "xsd", "xsl", "xls", "pdf", "doc", "ps", "db", "rtf", "ief", "ord", "rrd", "lbl",
    "aux", "ovr", "brs", "self", "report", "raw", "tgz", "pox", "img", "hdr", "ras", "ntf",
    "tfw", "gif", "jpg", "jgw", "log", "html", "htm", "png", "bmp", "kml", "kmz", "sav", "7z",
    "z", "gz", "tar", "exe", "so", "dll", "bat", "sh", "prj", "dbf", "shx", "shp", "ace",
    "ace2", "tooldes",
];

fn is_part_directory(name: &str) -> bool {
    !name.ends_with(".safe") && PART_DIRECTORIES.iter().any(|part| name.ends_with(part))
}

fn is_companion_file(name: &str) -> bool {
    COMPANION_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        || COMPANION_EXTENSIONS
            .iter()
            .any(|ext| name.ends_with(&format!(".{ext}")))
}

impl DescriptorRegistry<dyn ReaderPlugIn> {
    /// Opens `path` with the best qualified plug-in.
    pub fn open(&self, path: &Path) -> Result<Product> {
        let plug_in = self
            .best(path)
            .ok_or_else(|| RasterOpsError::NoReader(path.display().to_string()))?;
        info!("opening {} as {}", path.display(), plug_in.name());
        plug_in.open(path)
    }

    /// Whether some registered plug-in qualifies for `path`.
    pub fn can_open(&self, path: &Path) -> bool {
        self.best(path).is_some()
    }

    /// Every file below `dir` some plug-in qualifies for, sorted.
    ///
    /// Companion files (leaders, documents, sidecars) are not offered to the
    /// plug-ins, and folders holding parts of a product are not descended into.
    /// Symbolic links are not followed.
    pub fn scan(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        self.scan_into(dir, &mut found)?;
        found.sort();
        debug!("found {} products below {}", found.len(), dir.display());
        Ok(found)
    }

    fn scan_into(&self, dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_lowercase();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if !is_part_directory(&name) {
                    self.scan_into(&path, found)?;
                }
            } else if file_type.is_file() && !is_companion_file(&name) && self.can_open(&path) {
                found.push(path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn named_after_file() -> ProductFactory {
        Arc::new(|path: &Path| -> Result<Product> {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Product::new(stem, "TEST", (1, 1)))
        })
    }

    fn geotiff() -> FilePatternReaderPlugIn {
        FilePatternReaderPlugIn::new("GeoTIFF", [".tif", "tiff"], named_after_file())
    }

    #[rstest]
    #[case("K5_20140101_SCS.h5", Qualification::Intended)]
    #[case("/data/k5_scene.aux.xml", Qualification::Intended)]
    #[case("k5_scene.TIF", Qualification::Intended)]
    #[case("k5_scene.nc", Qualification::Unable)]
    #[case("scene.h5", Qualification::Unable)]
    #[case("/data/k5_dir/", Qualification::Unable)]
    fn kompsat5_naming(#[case] path: &str, #[case] expected: Qualification) {
        let plug_in = FilePatternReaderPlugIn::kompsat5(named_after_file());
        assert_eq!(plug_in.qualification(Path::new(path)), expected);
    }

    #[rstest]
    #[case("scene.TIF", Qualification::Suitable)]
    #[case("scene.tiff", Qualification::Suitable)]
    #[case("scene.tif.gz", Qualification::Unable)]
    #[case("notif", Qualification::Unable)]
    fn extension_only_is_suitable(#[case] path: &str, #[case] expected: Qualification) {
        assert_eq!(geotiff().qualification(Path::new(path)), expected);
    }

    #[test_log::test]
    fn registry_opens_with_intended_plug_in() {
        let registry: DescriptorRegistry<dyn ReaderPlugIn> = DescriptorRegistry::new();
        registry.register(Arc::new(geotiff()));
        let kompsat5 = FilePatternReaderPlugIn::kompsat5(Arc::new(|_: &Path| -> Result<Product> {
            Ok(Product::new("kompsat", "K5_SCS", (2, 2)))
        }));
        registry.register(Arc::new(kompsat5));

        let product = registry.open(Path::new("k5_scene.tif")).unwrap();
        assert_eq!(product.product_type(), "K5_SCS");
        let product = registry.open(Path::new("other.tif")).unwrap();
        assert_eq!(product.name(), "other");
        assert_eq!(
            registry.best(Path::new("k5_scene.tif")).unwrap().description(),
            "Kompsat-5 Products"
        );
    }

    fn envisat() -> FilePatternReaderPlugIn {
        FilePatternReaderPlugIn::new("ENVISAT", ["n1"], named_after_file()).with_prefix("mer_")
    }

    #[test_log::test]
    fn scan_collects_openable_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for file in [
            "MER_RR_1.N1",
            "k5_a.h5",
            "notes.txt",
            "readme.n1",
            "nested/MER_2.n1",
            "nested/k5_a.h5.aux",
            "nested/annotation/mer_3.n1",
            "scene.data/mer_4.n1",
            "S1A_IW.SAFE/mer_5.n1",
        ] {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"").unwrap();
        }
        let registry: DescriptorRegistry<dyn ReaderPlugIn> = DescriptorRegistry::new();
        assert!(registry.scan(root).unwrap().is_empty());

        registry.register(Arc::new(envisat()));
        registry.register(Arc::new(FilePatternReaderPlugIn::kompsat5(named_after_file())));
        assert!(registry.can_open(&root.join("k5_a.h5")));
        assert!(!registry.can_open(&root.join("notes.txt")));
        assert_eq!(
            registry.scan(root).unwrap(),
            vec![
                root.join("MER_RR_1.N1"),
                root.join("S1A_IW.SAFE/mer_5.n1"),
                root.join("k5_a.h5"),
                root.join("nested/MER_2.n1"),
            ]
        );
    }

    #[test]
    fn scan_of_missing_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry: DescriptorRegistry<dyn ReaderPlugIn> = DescriptorRegistry::new();
        registry.register(Arc::new(envisat()));
        let result = registry.scan(&dir.path().join("missing"));
        assert!(matches!(result, Err(RasterOpsError::Io(_))));
    }

    #[test]
    fn no_reader_for_unknown_files() {
        let registry: DescriptorRegistry<dyn ReaderPlugIn> = DescriptorRegistry::new();
        registry.register(Arc::new(geotiff()));
        let result = registry.open(Path::new("scene.nc"));
        assert!(matches!(result, Err(RasterOpsError::NoReader(path)) if path == "scene.nc"));
    }
}
