//! Role-aware konnector automation.
//!
//! The same [`ContentScript`] code runs twice: once as the pilot, which
//! talks to the launcher and orchestrates the workflow, and once as the
//! worker, which automates the vendor page. Each context learns its role
//! through `setContentScriptType`; role-restricted methods fail fast in the
//! other context.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | ContentScript struct, builder, role gating |
//! | `pilot` | Pilot-only workflow, worker control and launcher passthroughs |
//! | `worker` | Worker-only page automation and pilot relay |
//! | `methods` | Exposed method table |
//! | `konnector` | Vendor hooks |
//! | `page` | Worker DOM capability |
//! | `store` | Data relayed from the worker |
//! | `types` | File entries, cookies, worker state |
//!
//! # Example
//!
//! ```ignore
//! let pilot = ContentScript::builder(SncfKonnector::default()).build();
//! pilot.init_bridge(&Initiator::new(messenger)).await?;
//!
//! // The launcher then calls setContentScriptType("pilot"),
//! // ensureAuthenticated(), getUserDataFromWebsite() and fetch(context).
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod core;
mod konnector;
mod methods;
mod options;
mod page;
mod pilot;
mod role;
mod store;
mod types;
mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{ContentScript, ContentScriptBuilder, Evaluation};
pub use konnector::Konnector;
pub use methods::ExposedMethod;
pub use options::ContentScriptOptions;
pub use page::{FetchedResource, Page};
pub use pilot::UntilTrueOptions;
pub use role::{ContentScriptRole, ContentScriptState};
pub use store::Store;
pub use types::{Cookie, FileEntry, SaveBillsOptions, WorkerState};
