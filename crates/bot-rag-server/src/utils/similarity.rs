use anyhow::Result;

/// Cosine similarity between two embedding vectors, in [-1.0, 1.0].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        anyhow::bail!("Vector dimensions must match: {} != {}", a.len(), b.len());
    }

    if a.is_empty() {
        anyhow::bail!("Vectors cannot be empty");
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a = magnitude(a);
    let magnitude_b = magnitude(b);

    // Zero vectors carry no direction
    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot_product / (magnitude_a * magnitude_b);

    // Clamp floating point drift
    Ok(similarity.clamp(-1.0, 1.0))
}

pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Reject vectors that cannot be stored or compared: empty, wrong
/// dimension, or containing NaN/infinite components.
pub fn validate_vector(v: &[f32], dimension: usize) -> std::result::Result<(), String> {
    if v.is_empty() {
        return Err("vector must not be empty".to_string());
    }
    if v.len() != dimension {
        return Err(format!(
            "vector dimension mismatch: expected {}, got {}",
            dimension,
            v.len()
        ));
    }
    if let Some(pos) = v.iter().position(|x| !x.is_finite()) {
        return Err(format!("vector component {} is not a finite number", pos));
    }
    Ok(())
}
