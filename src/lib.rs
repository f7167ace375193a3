//! Reconstructs [fluorescence lifetime imaging microscopy
//! (FLIM)](https://en.wikipedia.org/wiki/Fluorescence-lifetime_imaging_microscopy)
//! data cubes from the Time-Tagged Time-Resolved (TTTR) FIFO photon-event
//! streams produced by time-correlated single-photon counting hardware such
//! as the PicoQuant MultiHarp/HydraHarp family.
//!
//! Please see the project README for information on contributing to the project.
//!
//! ## How to use
//!
//! A pipeline is built by chaining the components below over a single FIFO
//! file. Broadly speaking, these components fall into the following
//! categories:
//!
//! ### FIFO
//!
//! Byte-level reading and decoding of raw TTTR records into a typed event
//! stream with wrap-corrected macro-time.
//!
//! * [fifo]
//!
//! ### Calibration
//!
//! A one-pass scan over the decoded event stream that estimates the
//! per-line and per-frame sync-clock durations needed to place photons on a
//! pixel grid.
//!
//! * [calibration]
//!
//! ### Frame assembly and photon mapping
//!
//! Groups decoded events into per-frame windows and maps each photon to a
//! `(frame, z, y, x, channel, micro_time)` coordinate.
//!
//! * [frame]
//! * [mapper]
//!
//! ### Cube
//!
//! Accumulates mapped photons into a time-resolved histogram and writes the
//! result, plus metadata and optional companion images, to a self-describing
//! binary container.
//!
//! * [cube]
//! * [output]
//!
//! ## Examples
//!
//! The best example of a complete pipeline is the `flim_cube` CLI
//! implementation, and [`pipeline::build_cube_from_file`].
//!
//! ## API stability
//!
//! We follow the [Semantic Versioning 2.0.0](https://semver.org/) standard.
//!
//! As this library only supports one TTTR record variant at present (see
//! [fifo::format]), it is likely that internal representations will change
//! as more hardware record formats are added. For this reason we do not
//! anticipate a 1.x.x release in the near future.

pub mod calibration;
pub mod cube;
pub mod error;
pub mod fifo;
pub mod frame;
pub mod mapper;
pub mod output;
pub mod pipeline;
pub mod settings;
pub mod types;
