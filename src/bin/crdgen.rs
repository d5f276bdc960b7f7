use kube::CustomResourceExt;
use mysql_k8s::crd::MysqlCluster;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&MysqlCluster::crd())?);
    Ok(())
}
