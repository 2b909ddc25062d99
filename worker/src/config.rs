use std::{
    env, fs,
    net::{SocketAddr, ToSocketAddrs},
    num::NonZeroUsize,
    path::PathBuf,
};

use clustering::KMeansConfig;

use crate::{Result, WorkerErr};

/// How the group of workers is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Every worker is a thread of this process.
    Local { workers: NonZeroUsize },
    /// This process is one worker, the group meets at rank 0's address.
    Tcp {
        rank: usize,
        world_size: NonZeroUsize,
        root: SocketAddr,
    },
}

/// Everything a worker process needs to take part in a run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub launch: Launch,
    pub kmeans: KMeansConfig,
    pub data: PathBuf,
    pub output: Option<PathBuf>,
}

impl WorkerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads the configuration out of `lookup`, which maps a variable name to its value.
    ///
    /// `LOCAL_WORKERS` selects an in-process group, otherwise `RANK`, `WORLD_SIZE` and
    /// `ROOT_ADDR` are required. `KMEANS_CONFIG` names a json file and `DATA` a csv file, both
    /// required, `OUTPUT` is where rank 0 saves the centroids.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var).ok_or(WorkerErr::Env {
                var,
                detail: "not set".into(),
            })
        };

        let launch = match lookup("LOCAL_WORKERS") {
            Some(workers) => Launch::Local {
                workers: parse_count("LOCAL_WORKERS", &workers)?,
            },
            None => Launch::Tcp {
                rank: parse("RANK", &required("RANK")?)?,
                world_size: parse_count("WORLD_SIZE", &required("WORLD_SIZE")?)?,
                root: resolve("ROOT_ADDR", &required("ROOT_ADDR")?)?,
            },
        };

        let kmeans_path = required("KMEANS_CONFIG")?;
        let json = fs::read_to_string(&kmeans_path).map_err(|e| WorkerErr::Env {
            var: "KMEANS_CONFIG",
            detail: format!("{kmeans_path}: {e}"),
        })?;

        Ok(Self {
            launch,
            kmeans: KMeansConfig::from_json(&json)?,
            data: required("DATA")?.into(),
            output: lookup("OUTPUT").map(PathBuf::from),
        })
    }
}

fn parse(var: &'static str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|e| WorkerErr::Env {
        var,
        detail: format!("{value:?}: {e}"),
    })
}

fn parse_count(var: &'static str, value: &str) -> Result<NonZeroUsize> {
    NonZeroUsize::new(parse(var, value)?).ok_or(WorkerErr::Env {
        var,
        detail: "must be at least 1".into(),
    })
}

fn resolve(var: &'static str, value: &str) -> Result<SocketAddr> {
    let invalid = |detail: String| WorkerErr::Env { var, detail };

    value
        .to_socket_addrs()
        .map_err(|e| invalid(format!("{value:?}: {e}")))?
        .next()
        .ok_or_else(|| invalid(format!("{value:?} resolves to no address")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn kmeans_file(name: &str) -> String {
        let path = env::temp_dir().join(format!("{name}-{}.json", std::process::id()));
        fs::write(&path, r#"{ "k": 2, "seed": 4 }"#).unwrap();
        path.display().to_string()
    }

    fn lookup(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn tcp_launch() {
        let vars = HashMap::from([
            ("RANK", "2".to_string()),
            ("WORLD_SIZE", "3".to_string()),
            ("ROOT_ADDR", "127.0.0.1:4000".to_string()),
            ("KMEANS_CONFIG", kmeans_file("tcp-launch")),
            ("DATA", "data.csv".to_string()),
        ]);

        let config = WorkerConfig::from_lookup(lookup(vars)).unwrap();

        assert_eq!(
            config.launch,
            Launch::Tcp {
                rank: 2,
                world_size: NonZeroUsize::new(3).unwrap(),
                root: "127.0.0.1:4000".parse().unwrap(),
            }
        );
        assert_eq!(config.kmeans.seed, 4);
        assert_eq!(config.output, None);
    }

    #[test]
    fn local_launch_needs_no_address() {
        let vars = HashMap::from([
            ("LOCAL_WORKERS", "4".to_string()),
            ("KMEANS_CONFIG", kmeans_file("local-launch")),
            ("DATA", "data.csv".to_string()),
            ("OUTPUT", "out.safetensors".to_string()),
        ]);

        let config = WorkerConfig::from_lookup(lookup(vars)).unwrap();

        assert_eq!(
            config.launch,
            Launch::Local {
                workers: NonZeroUsize::new(4).unwrap()
            }
        );
        assert_eq!(config.output, Some(PathBuf::from("out.safetensors")));
    }

    #[test]
    fn missing_variables_are_named() {
        let vars = HashMap::from([("RANK", "0".to_string())]);

        match WorkerConfig::from_lookup(lookup(vars)) {
            Err(WorkerErr::Env { var, .. }) => assert_eq!(var, "WORLD_SIZE"),
            other => panic!("expected an env error, got {other:?}"),
        }
    }

    #[test]
    fn zero_workers_is_rejected() {
        let vars = HashMap::from([("LOCAL_WORKERS", "0".to_string())]);

        assert!(matches!(
            WorkerConfig::from_lookup(lookup(vars)),
            Err(WorkerErr::Env {
                var: "LOCAL_WORKERS",
                ..
            })
        ));
    }
}
