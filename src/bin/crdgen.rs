//! Print the KubeNova CustomResourceDefinition as YAML

use kube::CustomResourceExt;
use kubenova_operator::crd::KubeNova;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&KubeNova::crd())?);
    Ok(())
}
