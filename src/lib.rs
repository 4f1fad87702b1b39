//! Schema-driven codec between FHIR resources and Avro-shaped records.
//!
//! A `.avsc` document is lowered into a [`SchemaModel`]; the [`Encoder`] walks
//! a live resource against it and produces an [`EncodedRecord`], and the
//! [`Decoder`] walks an encoded record back into a live resource.
pub mod config;
pub mod error;
pub mod schema;
pub mod lower;
pub mod path;
pub mod union;
pub mod scalar;
pub mod value;
pub mod live;
pub mod encode;
pub mod decode;
pub mod path_de;
pub mod jq_exec;
pub mod cli;

pub use config::CodecOptions;
pub use decode::Decoder;
pub use encode::Encoder;
pub use error::{CodecError, ConversionError, SchemaError};
pub use live::{LiveObject, LiveTree, Primitive, PrimitiveKind, ResourceTree};
pub use schema::SchemaModel;
pub use value::{EncodedRecord, EncodedValue};
