mod common;

use std::{num::NonZeroUsize, thread};

use clustering::{InitSpec, KMeans, KMeansConfig, Shard, persist};
use common::{blobs, run_group};
use comms::{Collective, TcpCollective};
use ndarray::Array2;

const WORLD_SIZE: usize = 3;

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn config() -> KMeansConfig {
    let mut config = KMeansConfig::new(3);
    config.init = InitSpec::KmeansPlusplus;
    config.seed = 21;
    config
}

fn fit(data: &Array2<f64>, comm: &dyn Collective) -> Array2<f64> {
    let shard = Shard::from_global(data.view(), comm.rank(), nz(WORLD_SIZE));
    let mut model = KMeans::new(config()).unwrap();
    model.fit(&shard, comm).unwrap();
    model.centroids().unwrap().view().to_owned()
}

#[test]
fn tcp_and_threads_agree_bit_for_bit() {
    let data = blobs(6);

    let local = run_group(WORLD_SIZE, |comm| fit(&data, &comm)).remove(0);

    let pending = TcpCollective::listen("127.0.0.1:0".parse().unwrap(), nz(WORLD_SIZE)).unwrap();
    let root = pending.local_addr().unwrap();

    let over_tcp = thread::scope(|s| {
        let peers: Vec<_> = (1..WORLD_SIZE)
            .map(|rank| {
                let data = &data;
                s.spawn(move || {
                    let comm = TcpCollective::join(rank, nz(WORLD_SIZE), root).unwrap();
                    let centroids = fit(data, &comm);
                    comm.disconnect().unwrap();
                    centroids
                })
            })
            .collect();

        let comm = pending.accept().unwrap();
        let centroids = fit(&data, &comm);
        comm.disconnect().unwrap();

        for peer in peers {
            assert_eq!(peer.join().unwrap(), centroids);
        }
        centroids
    });

    let bits = |m: &Array2<f64>| m.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&over_tcp), bits(&local));
}

#[test]
fn persisted_centroids_predict_like_the_fitted_model() {
    let data = blobs(7);
    let path = std::env::temp_dir().join(format!("fitted-{}.safetensors", std::process::id()));

    let models = run_group(2, |comm| {
        let shard = Shard::from_global(data.view(), comm.rank(), nz(2));
        let mut model = KMeans::new(config()).unwrap();
        model.fit(&shard, &comm).unwrap();

        if comm.rank() == 0 {
            persist::save_centroids(&path, model.centroids().unwrap()).unwrap();
        }
        comm.barrier().unwrap();

        model
    });

    let loaded = persist::load_centroids(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(&loaded, models[0].centroids().unwrap());

    let restored = KMeans::with_centroids(config(), loaded).unwrap();
    assert_eq!(
        restored.predict(data.view()).unwrap(),
        models[1].predict(data.view()).unwrap()
    );
}
