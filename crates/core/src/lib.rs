pub mod assembler;
pub mod config;
pub mod container;
pub mod coordinator;
pub mod error;
pub mod metadata;
pub mod policy;
pub mod sink;
pub mod stream;

pub use assembler::{AssembledSegment, InfoLineDecoder, SegmentAssembler};
pub use config::{ChunkerConfig, Delivery, PolicyConfig};
pub use container::{ContainerSerializer, SerializerOptions, WebmSerializer};
pub use coordinator::{ChunkCoordinator, SessionState, SessionSummary, WebmChunker};
pub use error::{Result, SegmuxError};
pub use metadata::{BoundaryEvent, EventKind, MetadataEmitter};
pub use policy::SegmentPolicy;
pub use sink::{MediaOutput, ObjectKey, ObjectSink};
pub use stream::{Codec, Packet, StreamDescriptor, TimeBase};
