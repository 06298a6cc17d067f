//! Deterministic reference embeddings.
//!
//! Real deployments swap this for an actual embedding model; the point
//! here is a fully deterministic 384-dimensional vector so semantic
//! ranking is reproducible in tests.
//!
//! Pipeline:
//! 1. Tokenize to lower-cased ASCII words, punctuation stripped.
//! 2. Each word maps to a 4-dimensional semantic vector from a fixed
//!    vocabulary table; unknown words get a default vector perturbed by
//!    a seeded hash.
//! 3. Word vectors are summed and L2-normalized.
//! 4. The 4-vector expands to 384 dimensions (`v[i] = norm[i % 4]` plus
//!    seeded per-index noise) and is normalized again.

/// Output dimensionality.
pub const DIMENSIONS: usize = 384;

/// Dimensionality of the word-level semantic space.
const SEMANTIC_DIM: usize = 4;

/// Fixed word vocabulary. Axes are rough domain directions:
/// 0 = AI/ML, 1 = programming, 2 = systems/devops/database, 3 = everyday
/// (food, commerce). Words within a domain vary slightly so they are
/// close but not identical.
const SEMANTIC_VECTORS: &[(&str, [f32; SEMANTIC_DIM])] = &[
    // --- AI / ML ---
    ("ai", [0.95, 0.15, 0.05, 0.00]),
    ("ml", [0.92, 0.18, 0.06, 0.00]),
    ("model", [0.88, 0.20, 0.08, 0.02]),
    ("neural", [0.93, 0.10, 0.04, 0.01]),
    ("network", [0.70, 0.15, 0.40, 0.00]),
    ("learning", [0.90, 0.12, 0.03, 0.05]),
    ("machine", [0.85, 0.18, 0.15, 0.02]),
    ("training", [0.87, 0.10, 0.08, 0.06]),
    ("inference", [0.89, 0.14, 0.07, 0.00]),
    ("embedding", [0.91, 0.20, 0.10, 0.00]),
    ("vector", [0.84, 0.25, 0.12, 0.00]),
    ("llm", [0.96, 0.14, 0.04, 0.00]),
    ("gpt", [0.94, 0.12, 0.03, 0.00]),
    ("agent", [0.86, 0.22, 0.10, 0.03]),
    ("prompt", [0.88, 0.24, 0.05, 0.02]),
    ("token", [0.80, 0.30, 0.10, 0.02]),
    ("transformer", [0.92, 0.16, 0.06, 0.00]),
    // --- Programming ---
    ("code", [0.20, 0.92, 0.15, 0.00]),
    ("coding", [0.18, 0.93, 0.12, 0.00]),
    ("program", [0.15, 0.90, 0.18, 0.00]),
    ("programming", [0.16, 0.94, 0.15, 0.00]),
    ("software", [0.12, 0.88, 0.25, 0.00]),
    ("developer", [0.10, 0.90, 0.20, 0.02]),
    ("function", [0.14, 0.89, 0.12, 0.00]),
    ("compiler", [0.08, 0.91, 0.18, 0.00]),
    ("debug", [0.06, 0.88, 0.22, 0.00]),
    ("typescript", [0.10, 0.95, 0.10, 0.00]),
    ("javascript", [0.10, 0.94, 0.11, 0.00]),
    ("python", [0.25, 0.90, 0.10, 0.02]),
    ("rust", [0.08, 0.92, 0.25, 0.00]),
    ("java", [0.06, 0.90, 0.18, 0.02]),
    ("api", [0.15, 0.85, 0.30, 0.02]),
    ("library", [0.12, 0.86, 0.20, 0.05]),
    ("framework", [0.12, 0.88, 0.22, 0.01]),
    ("guide", [0.08, 0.75, 0.15, 0.15]),
    ("tutorial", [0.10, 0.78, 0.12, 0.12]),
    ("documentation", [0.08, 0.80, 0.18, 0.05]),
    // --- Database / systems ---
    ("database", [0.15, 0.40, 0.88, 0.00]),
    ("query", [0.18, 0.45, 0.85, 0.00]),
    ("sql", [0.08, 0.42, 0.90, 0.00]),
    ("table", [0.05, 0.30, 0.80, 0.10]),
    ("index", [0.12, 0.35, 0.84, 0.00]),
    ("schema", [0.10, 0.44, 0.86, 0.00]),
    ("record", [0.08, 0.32, 0.82, 0.05]),
    ("storage", [0.06, 0.28, 0.88, 0.02]),
    ("cache", [0.08, 0.34, 0.87, 0.00]),
    ("transaction", [0.05, 0.30, 0.85, 0.12]),
    ("graph", [0.30, 0.40, 0.80, 0.00]),
    ("entity", [0.15, 0.42, 0.82, 0.02]),
    ("relation", [0.14, 0.38, 0.83, 0.02]),
    // --- Devops ---
    ("deploy", [0.05, 0.45, 0.88, 0.00]),
    ("deployment", [0.05, 0.44, 0.89, 0.00]),
    ("docker", [0.04, 0.40, 0.92, 0.00]),
    ("kubernetes", [0.05, 0.38, 0.93, 0.00]),
    ("server", [0.08, 0.42, 0.90, 0.00]),
    ("cloud", [0.15, 0.35, 0.88, 0.02]),
    ("infrastructure", [0.04, 0.30, 0.92, 0.00]),
    ("pipeline", [0.18, 0.40, 0.85, 0.00]),
    ("monitoring", [0.08, 0.36, 0.88, 0.00]),
    ("container", [0.04, 0.38, 0.90, 0.03]),
    ("cluster", [0.15, 0.32, 0.89, 0.00]),
    // --- Food ---
    ("food", [0.00, 0.00, 0.05, 0.96]),
    ("restaurant", [0.00, 0.00, 0.08, 0.95]),
    ("pasta", [0.00, 0.00, 0.02, 0.97]),
    ("pizza", [0.00, 0.00, 0.03, 0.96]),
    ("cooking", [0.00, 0.02, 0.04, 0.95]),
    ("cook", [0.00, 0.02, 0.05, 0.94]),
    ("chef", [0.00, 0.00, 0.06, 0.93]),
    ("italian", [0.00, 0.00, 0.04, 0.92]),
    ("recipe", [0.00, 0.05, 0.05, 0.93]),
    ("meal", [0.00, 0.00, 0.03, 0.94]),
    ("dinner", [0.00, 0.00, 0.02, 0.95]),
    ("lunch", [0.00, 0.00, 0.02, 0.94]),
    ("cuisine", [0.00, 0.00, 0.05, 0.96]),
    ("kitchen", [0.00, 0.02, 0.10, 0.92]),
    ("menu", [0.00, 0.08, 0.06, 0.90]),
    ("dish", [0.00, 0.00, 0.04, 0.93]),
    ("delicious", [0.00, 0.00, 0.00, 0.95]),
    ("wine", [0.00, 0.00, 0.02, 0.92]),
    ("eat", [0.00, 0.00, 0.02, 0.93]),
    ("eating", [0.00, 0.00, 0.02, 0.93]),
    // --- Commerce ---
    ("shop", [0.00, 0.05, 0.15, 0.85]),
    ("shopping", [0.00, 0.04, 0.12, 0.86]),
    ("store", [0.00, 0.06, 0.25, 0.82]),
    ("buy", [0.00, 0.02, 0.10, 0.86]),
    ("sell", [0.00, 0.02, 0.12, 0.85]),
    ("price", [0.00, 0.08, 0.20, 0.82]),
    ("order", [0.02, 0.10, 0.30, 0.80]),
    ("cart", [0.00, 0.08, 0.18, 0.84]),
    ("payment", [0.00, 0.10, 0.35, 0.78]),
    ("customer", [0.02, 0.08, 0.28, 0.80]),
    ("product", [0.02, 0.10, 0.25, 0.82]),
    ("checkout", [0.00, 0.10, 0.22, 0.82]),
    ("invoice", [0.00, 0.08, 0.35, 0.76]),
    ("market", [0.04, 0.05, 0.20, 0.84]),
    // --- Security ---
    ("security", [0.15, 0.35, 0.80, 0.05]),
    ("auth", [0.10, 0.45, 0.78, 0.02]),
    ("authentication", [0.10, 0.44, 0.79, 0.02]),
    ("encryption", [0.12, 0.40, 0.82, 0.00]),
    ("password", [0.05, 0.40, 0.75, 0.08]),
    ("vulnerability", [0.10, 0.38, 0.80, 0.00]),
    ("attack", [0.12, 0.30, 0.78, 0.04]),
    ("firewall", [0.05, 0.32, 0.85, 0.00]),
    ("threat", [0.12, 0.28, 0.78, 0.02]),
    ("secure", [0.10, 0.38, 0.80, 0.04]),
    ("certificate", [0.05, 0.36, 0.80, 0.02]),
    ("audit", [0.06, 0.30, 0.78, 0.10]),
];

/// Lower-cased ASCII words, punctuation removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

fn semantic_vector(word: &str) -> [f32; SEMANTIC_DIM] {
    if let Some((_, v)) = SEMANTIC_VECTORS.iter().find(|(w, _)| *w == word) {
        return *v;
    }
    // Unknown word: default direction perturbed by a seeded hash so
    // distinct words stay distinct but deterministic.
    let hash = fnv1a(word.as_bytes());
    let mut v = [0.25f32; SEMANTIC_DIM];
    for (i, item) in v.iter_mut().enumerate() {
        let byte = ((hash >> (i * 8)) & 0xff) as f32;
        *item += byte / 255.0 * 0.1 - 0.05;
    }
    v
}

/// Embed text into a deterministic 384-dimensional unit vector.
pub fn embed(text: &str) -> Vec<f32> {
    let mut sum = [0.0f32; SEMANTIC_DIM];
    for word in tokenize(text) {
        let v = semantic_vector(&word);
        for i in 0..SEMANTIC_DIM {
            sum[i] += v[i];
        }
    }
    l2_normalize(&mut sum);

    let mut out = vec![0.0f32; DIMENSIONS];
    for (i, item) in out.iter_mut().enumerate() {
        *item = sum[i % SEMANTIC_DIM] + index_noise(i);
    }
    l2_normalize(&mut out);
    out
}

/// Deterministic per-index noise in [-0.05, 0.05].
fn index_noise(i: usize) -> f32 {
    let hash = fnv1a(&(i as u64).to_le_bytes());
    (hash & 0xffff) as f32 / 65535.0 * 0.1 - 0.05
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}

/// Map cosine from [-1, 1] to a [0, 1] score.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f64 {
    let score = (f64::from(cosine(a, b)) + 1.0) / 2.0;
    score.clamp(0.0, 1.0)
}

/// FNV-1a, used for seeded perturbation and artifact content hashes.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Hex content hash for artifact staleness checks.
pub fn content_hash(text: &str) -> String {
    format!("{:016x}", fnv1a(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_punctuation() {
        assert_eq!(tokenize("antonio's restaurant!"), vec!["antonio", "s", "restaurant"]);
        assert_eq!(tokenize("Hello, World"), vec!["hello", "world"]);
    }

    #[test]
    fn test_embed_is_deterministic_and_unit() {
        let a = embed("cooking italian food");
        let b = embed("cooking italian food");
        assert_eq!(a, b);
        assert_eq!(a.len(), DIMENSIONS);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_bounds() {
        let a = embed("pasta dinner");
        let b = embed("typescript compiler");
        let score = similarity_score(&a, &b);
        assert!((0.0..=1.0).contains(&score));
        assert!((similarity_score(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_domain_clustering() {
        let query = embed("restaurant food");
        let food = embed("cooking italian food");
        let prog = embed("typescript guide");
        assert!(similarity_score(&query, &food) > similarity_score(&query, &prog));
    }

    #[test]
    fn test_empty_text_embeds_without_nan() {
        let v = embed("");
        assert!(v.iter().all(|x| x.is_finite()));
    }
}
