//! CRDs owned by this operator, and lightweight typed views of foreign resources this operator
//! only reads (or, for `App.spec.extraConfigs`, patches one field of).

mod cluster;
mod grafana_organization;
mod tenant;

pub use cluster::*;
pub use grafana_organization::*;
pub use tenant::*;
