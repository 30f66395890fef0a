//! One-shot CRD-yaml printer (spec.md §0, teacher's `bin/crdgen.rs` split).
//!
//! Only prints CRDs this operator owns: `GrafanaOrganization`, in both served versions. `Cluster`
//! and `App` are modeled with `#[derive(CustomResource)]` purely for typed `Api<T>` access to
//! resources this operator doesn't own the schema of (spec.md §3 "Ownership") and are
//! deliberately not emitted here.

use kube::CustomResourceExt;

fn main() {
    let resources = [
        observability_operator::resources::v1alpha1::GrafanaOrganization::crd(),
        observability_operator::resources::v1alpha2::GrafanaOrganization::crd(),
    ];

    for resource in resources {
        println!("---");
        print!("{}", serde_yaml::to_string(&resource).unwrap());
    }
}
