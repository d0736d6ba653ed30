use rootsift_core::{
    DegeneratePolicy, ExtractorError, NormalizedDescriptor, RawDescriptor, TaskError, TaskResult,
    DESCRIPTOR_DIM,
};

/// Sum of absolute values, accumulated in `f64`
pub fn l1_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| (x as f64).abs()).sum()
}

/// rootSIFT transform of a single descriptor: `u[i] = sqrt(|v[i]| / sum(|v|))`.
///
/// Returns `None` when the L1 norm is zero or not finite; the transform is undefined there.
pub fn root_normalize(raw: &RawDescriptor) -> Option<NormalizedDescriptor> {
    let s = l1_norm(raw);
    if s <= 0.0 || !s.is_finite() {
        return None;
    }

    let mut out = [0.0f32; DESCRIPTOR_DIM];
    for (u, &v) in out.iter_mut().zip(raw.iter()) {
        *u = ((v as f64).abs() / s).sqrt() as f32;
    }
    Some(NormalizedDescriptor(out))
}

/// Normalize every descriptor of an image, resolving zero-norm vectors by `policy`.
///
/// A non-finite raw component is malformed extractor output and fails the image
/// regardless of policy.
pub fn root_normalize_all(raw: &[RawDescriptor], policy: DegeneratePolicy) -> TaskResult<Vec<NormalizedDescriptor>> {
    let mut degenerate = 0usize;
    let out = raw
        .iter()
        .enumerate()
        .map(|(index, v)| {
            if v.iter().any(|x| !x.is_finite()) {
                return Err(TaskError::from(ExtractorError::NonFinite { index }));
            }
            match root_normalize(v) {
                Some(u) => Ok(u),
                None => match policy {
                    DegeneratePolicy::ZeroFill => {
                        degenerate += 1;
                        Ok(NormalizedDescriptor::ZERO)
                    }
                    DegeneratePolicy::Reject => Err(TaskError::DegenerateDescriptor { index }),
                },
            }
        })
        .collect::<TaskResult<Vec<_>>>()?;

    if degenerate > 0 {
        tracing::debug!(degenerate, total = raw.len(), "zero-filled degenerate descriptors");
    }
    Ok(out)
}
