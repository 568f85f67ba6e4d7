//! # blip
//!
//! Turns the Norwegian police log into a map of incidents.
//!
//! A cron-driven cycle pulls recent message threads from the police-log
//! feed, asks a language model for a location, type, severity and summary,
//! geocodes the location against the thread's police district, and upserts
//! one incident per thread into SQLite. Active incidents are revisited on
//! every cycle until they go quiet for a week.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │ Police log  │──▶│ Pipeline                  │──▶│  SQLite  │
//! │ feed        │   │ extract ▸ geocode ▸ upsert│   │ incidents│
//! └─────────────┘   └───────────────────────────┘   └────┬─────┘
//!                                                        │
//!                      ┌─────────────────────────────────┤
//!                      ▼                                 ▼
//!                 ┌──────────┐                     ┌──────────┐
//!                 │   CLI    │                     │   HTTP   │
//!                 │  (blip)  │                     │ trigger  │
//!                 └──────────┘                     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! blip init                     # create database
//! blip sync                     # run one cycle
//! blip incidents --since 2024-03-01
//! CRON_SECRET=... blip serve    # POST /api/blip/fetch from cron
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Threads, incidents, cycle stats |
//! | [`traits`] | Source, extractor and geocoder seams |
//! | [`source`] | Police-log feed client |
//! | [`extract`] | Report rendering and structured extraction |
//! | [`districts`] | District bias points |
//! | [`geocode`] | Place lookup |
//! | [`store`] | Incident persistence |
//! | [`ingest`] | The ingestion cycle |
//! | [`incidents`] | Marker-data query |
//! | [`stats`] | Store overview |
//! | [`server`] | HTTP trigger server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod districts;
pub mod extract;
pub mod geocode;
pub mod incidents;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod server;
pub mod source;
pub mod stats;
pub mod store;
pub mod traits;
