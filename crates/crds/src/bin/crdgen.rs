//! Prints the CloudBaseMain CRD manifest as YAML.

use kube::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&crds::CloudBaseMain::crd()) {
        Ok(manifest) => print!("{manifest}"),
        Err(e) => {
            eprintln!("Failed to serialize CloudBaseMain CRD: {e}");
            std::process::exit(1);
        }
    }
}
