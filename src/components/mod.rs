pub mod band;
pub mod bounds;
pub mod data;
#[cfg(feature = "gdal")]
pub mod engines;
pub mod expression;
pub mod flags;
pub mod metadata;
pub mod product;
pub mod readers;
pub mod tile;
pub mod transforms;

pub use band::{Band, BandReader, BandSource};
pub use bounds::PixelBounds;
pub use data::{DataType, RasterData, Sample};
pub use expression::{BinaryOp, CompiledExpression, Expression, UnaryOp};
pub use flags::{Flag, FlagCoding, Mask};
pub use metadata::Metadata;
pub use product::{Product, ProductId};
pub use readers::MemoryBandReader;
pub use tile::Tile;
pub use transforms::GeoCoding;
