//! Prints the StackOps CRDs as a multi-document YAML stream
//!
//! ```sh
//! cargo run -p crds --bin crdgen > config/crd/stackops.yaml
//! ```

use anyhow::Context;
use crds::{OpenStackCluster, OpenStackMachine, OpenStackServerGroup};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        OpenStackCluster::crd(),
        OpenStackMachine::crd(),
        OpenStackServerGroup::crd(),
    ];

    for crd in &crds {
        let name = crd.metadata.name.as_deref().unwrap_or_default();
        let yaml = serde_yaml::to_string(crd).with_context(|| format!("serializing {name}"))?;
        println!("---");
        print!("{yaml}");
    }

    Ok(())
}
