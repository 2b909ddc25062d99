use std::{collections::HashMap, fs, path::Path};

use log::info;
use ndarray::Array2;
use safetensors::{
    SafeTensors, serialize,
    tensor::{Dtype, TensorView},
};

use crate::{CentroidSet, KMeansErr, Result};

const CENTROIDS: &str = "centroids";
const K: &str = "k";

/// Encodes a centroid set as a safetensors buffer.
///
/// The buffer holds one little endian f64 tensor named `centroids` of shape [k, f] and the
/// metadata entry `k`.
pub fn to_bytes(centroids: &CentroidSet) -> Result<Vec<u8>> {
    let data: Vec<u8> = centroids
        .view()
        .iter()
        .flat_map(|x| x.to_le_bytes())
        .collect();

    let shape = vec![centroids.k(), centroids.n_features()];
    let view = TensorView::new(Dtype::F64, shape, &data)
        .map_err(|e| KMeansErr::LoadFailure(format!("can't encode centroids: {e}")))?;

    let metadata = HashMap::from([(K.to_string(), centroids.k().to_string())]);

    serialize([(CENTROIDS, view)], &Some(metadata))
        .map_err(|e| KMeansErr::LoadFailure(format!("can't encode centroids: {e}")))
}

/// Decodes a buffer written by `to_bytes`.
///
/// # Returns
/// The centroid set, or `LoadFailure` if the buffer is not a valid record.
pub fn from_bytes(bytes: &[u8]) -> Result<CentroidSet> {
    let fail = |detail: String| KMeansErr::LoadFailure(detail);

    let (_, metadata) = SafeTensors::read_metadata(bytes).map_err(|e| fail(e.to_string()))?;
    let k: usize = metadata
        .metadata()
        .as_ref()
        .and_then(|entries| entries.get(K))
        .ok_or_else(|| fail("the record has no k".into()))?
        .parse()
        .map_err(|e| fail(format!("invalid k: {e}")))?;

    let tensors = SafeTensors::deserialize(bytes).map_err(|e| fail(e.to_string()))?;
    let tensor = tensors.tensor(CENTROIDS).map_err(|e| fail(e.to_string()))?;

    if tensor.dtype() != Dtype::F64 {
        return Err(fail(format!("expected f64 centroids, got {:?}", tensor.dtype())));
    }

    let &[rows, cols] = tensor.shape() else {
        return Err(fail(format!("expected a matrix, got shape {:?}", tensor.shape())));
    };

    if rows != k {
        return Err(fail(format!("the record says k = {k} but holds {rows} centroids")));
    }

    let values: Vec<f64> = tensor
        .data()
        .chunks_exact(size_of::<f64>())
        .map(|chunk| {
            let mut word = [0; size_of::<f64>()];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        })
        .collect();

    let matrix = Array2::from_shape_vec((rows, cols), values).map_err(|e| fail(e.to_string()))?;
    CentroidSet::from_matrix(matrix).map_err(|e| fail(e.to_string()))
}

/// Writes a centroid set to `path`. Only one rank of a group should call this.
pub fn save_centroids(path: impl AsRef<Path>, centroids: &CentroidSet) -> Result<()> {
    let path = path.as_ref();
    let bytes = to_bytes(centroids)?;

    fs::write(path, bytes)
        .map_err(|e| KMeansErr::LoadFailure(format!("{}: {e}", path.display())))?;

    info!(k = centroids.k(); "saved centroids to {}", path.display());
    Ok(())
}

/// Reads a centroid set written by `save_centroids`.
pub fn load_centroids(path: impl AsRef<Path>) -> Result<CentroidSet> {
    let path = path.as_ref();
    let bytes =
        fs::read(path).map_err(|e| KMeansErr::LoadFailure(format!("{}: {e}", path.display())))?;

    from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use std::env;

    use ndarray::array;

    use super::*;

    fn sample_set() -> CentroidSet {
        CentroidSet::from_matrix(array![[1.5, -2.], [0., f64::MAX], [-0., 1e-300]]).unwrap()
    }

    #[test]
    fn bytes_keep_every_bit() {
        let set = sample_set();
        let back = from_bytes(&to_bytes(&set).unwrap()).unwrap();

        let bits = |s: &CentroidSet| s.view().iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back), bits(&set));
        assert_eq!(back.view().dim(), (3, 2));
    }

    #[test]
    fn file_round_trip() {
        let path = env::temp_dir().join(format!("centroids-{}.safetensors", std::process::id()));
        let set = sample_set();

        save_centroids(&path, &set).unwrap();
        let back = load_centroids(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(back, set);
    }

    #[test]
    fn garbage_is_a_load_failure() {
        assert!(matches!(
            from_bytes(b"definitely not a tensor file"),
            Err(KMeansErr::LoadFailure(_))
        ));
    }

    #[test]
    fn truncated_record_is_a_load_failure() {
        let bytes = to_bytes(&sample_set()).unwrap();

        assert!(matches!(
            from_bytes(&bytes[..bytes.len() - 5]),
            Err(KMeansErr::LoadFailure(_))
        ));
    }

    #[test]
    fn missing_file_is_a_load_failure() {
        assert!(matches!(
            load_centroids("/definitely/not/here.safetensors"),
            Err(KMeansErr::LoadFailure(_))
        ));
    }
}
