//! External Interface Ports
//!
//! Narrow contracts through which the repository manager consumes its
//! collaborators. The manager orchestrates; implementations are supplied
//! by the host:
//! - `cube`: the cube object, its axes and cell access, plus factories
//!   for construction and resource loading
//! - `persister`: the durable store of cube revisions
//! - `delta`: delta computation for three-way merges
//! - `broadcast`: structural-change fan-out to peers

pub mod broadcast;
pub mod cube;
pub mod delta;
pub mod persister;

pub use broadcast::{Broadcaster, ChangeEvent, ChannelBroadcaster, LogBroadcaster};
pub use cube::{Advice, Axis, CellValue, Coordinate, Cube, CubeFactory, LoaderFactory, ResourceLoader};
pub use delta::{Delta, DeltaKind, DeltaProcessor, DeltaRegion, DeltaSet};
pub use persister::{ChangeType, CubeInfo, Persister, SearchOptions};
