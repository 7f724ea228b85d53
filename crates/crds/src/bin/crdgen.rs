//! Renders the Meshlink CRD manifests as YAML for cluster installation.

use kube::CustomResourceExt;

fn main() {
    let manifests = [
        serde_yaml::to_string(&crds::ServiceExport::crd()),
        serde_yaml::to_string(&crds::ServiceImport::crd()),
    ];

    for manifest in manifests {
        match manifest {
            Ok(yaml) => println!("---\n{yaml}"),
            Err(e) => eprintln!("failed to render CRD: {e}"),
        }
    }
}
