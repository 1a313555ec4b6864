//! Two-layer big-block allocator with reservations and delayed reuse (spec
//! §2 C4 / §4.3).

pub mod freemap;
pub mod layer;
pub mod reservation;
pub mod space;

pub use freemap::{Freemap, ResvId, VolumeId};
pub use reservation::{Reservation, RESV_LAYER2FREE, RESV_ONDELAY};
pub use space::{space_ok, SpaceCheckSizing, SpaceRequest};
