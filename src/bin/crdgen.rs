//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for all custom resources
//! reconciled by the cosmotech-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use cosmotech_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
