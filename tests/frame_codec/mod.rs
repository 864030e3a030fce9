//! Integration tests for the HTTP/2 frame codec

mod control_frames;
mod frame_building;
