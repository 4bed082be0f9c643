/*!
# Unit Registry

A small web service for registering facility units (health posts, offices, schools)
grouped by locality, and exporting them as spreadsheets.

## Overview

Field teams fill a registration page describing each unit: responsible person, staff
count, flooring and wall types, which facilities it has and the measured areas the
cleaning contract is priced on. Every submission is stored in a JSON record file and,
when mail is configured, the unit's spreadsheet is mailed to the contract managers.

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, JavaScript
- Registration form with dynamic measurement blocks per category
- Vocabulary lists loaded from the API

### Backend Layer
- **Technologies**: Rust, axum
- **Core Components**:
  - Record Store - localities and units persisted atomically to one JSON file
  - Submission Coercion - accepts the historical payload shapes and normalizes them
  - Export Transformer - flattens units into a 16 column table, XLSX or CSV
  - Mailer - SMTP delivery of exported workbooks
  - Authentication - optional HTTP Basic credentials, argon2 hashed

## Modules

- **model**: Canonical unit, measurement and vocabulary types
- **submission**: Client payloads and their coercion into units
- **store**: Record store
- **export**: Export table, XLSX and CSV encoders, mail bodies
- **mailer**: SMTP delivery
- **login**: User directory and password hashing
- **config**: Command-line and environment configuration
- **logger**: Logging setup
- **app**: Routing and middleware

## REST API Endpoints

- `/api/vocabulary` - Flooring, wall and measurement category labels
- `/api/localities` - Lists or creates localities
- `/api/units` - Lists units or registers a new one
- `/api/units/{locality}/{unit}` - Reads, replaces or deletes a unit
- `/api/export`, `/api/export/csv` - Spreadsheet downloads
- `/api/export/email` - Mails a spreadsheet to the configured recipients
*/

pub mod config;
pub mod error;
pub mod export;
pub mod logger;
pub mod model;
pub mod store;
pub mod submission;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod mailer;

pub use error::{MailDeliveryError, RegistryError, Result};
pub use model::*;
pub use store::RecordStore;
