//! Detection of model features that can't be printed without something
//! underneath them.

mod overhangs;

pub use overhangs::{detect_face_overhangs, detect_point_overhangs};
