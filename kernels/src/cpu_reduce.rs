use crate::{KernelElem, KernelError, Result};

/// Elementwise combining operator for a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReduceOp {
    /// Elementwise sum. This is the operator used to combine gradients.
    #[default]
    Sum,
    /// Elementwise sum divided by the number of inputs.
    Mean,
    /// Elementwise maximum.
    Max,
    /// Elementwise minimum.
    Min,
}

impl ReduceOp {
    #[inline]
    fn combine<T: KernelElem>(self, acc: &mut T, value: T) {
        match self {
            ReduceOp::Sum | ReduceOp::Mean => *acc += value,
            ReduceOp::Max => {
                if value > *acc {
                    *acc = value;
                }
            }
            ReduceOp::Min => {
                if value < *acc {
                    *acc = value;
                }
            }
        }
    }
}

/// CPU implementation of a multi-input elementwise reduction.
///
/// `out` is overwritten with the reduction of every slice yielded by `inputs`.
/// Inputs are combined strictly in iteration order: the first input is copied,
/// then each following input is folded in. Callers that need bit-identical
/// results on every participant must therefore yield the inputs in the same
/// order everywhere (the collectives use ascending rank order).
///
/// `out` must not alias any of the inputs.
///
/// # Errors
///
/// - [`KernelError::ShapeMismatch`] if any input length differs from `out.len()`.
/// - [`KernelError::EmptyReduction`] if `inputs` yields nothing.
/// - [`KernelError::Unsupported`] if `op` is [`ReduceOp::Mean`] and the input
///   count cannot be represented as `T`.
pub fn cpu_reduce_into<'a, T, I>(out: &mut [T], inputs: I, op: ReduceOp) -> Result<()>
where
    T: KernelElem + 'a,
    I: IntoIterator<Item = &'a [T]>,
{
    let mut count = 0usize;

    for input in inputs {
        if input.len() != out.len() {
            return Err(KernelError::ShapeMismatch {
                expected: vec![out.len()],
                got: vec![input.len()],
            });
        }

        if count == 0 {
            out.copy_from_slice(input);
        } else {
            for (acc, &value) in out.iter_mut().zip(input) {
                op.combine(acc, value);
            }
        }
        count += 1;
    }

    if count == 0 {
        return Err(KernelError::EmptyReduction);
    }

    if op == ReduceOp::Mean {
        let divisor = T::from_usize(count).ok_or_else(|| {
            KernelError::Unsupported(format!("mean divisor {count} is not representable"))
        })?;
        for acc in out.iter_mut() {
            *acc /= divisor;
        }
    }

    Ok(())
}

/// CPU implementation of a length-checked copy.
pub fn cpu_copy<T: KernelElem>(dst: &mut [T], src: &[T]) -> Result<()> {
    if dst.len() != src.len() {
        return Err(KernelError::ShapeMismatch {
            expected: vec![dst.len()],
            got: vec![src.len()],
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_sum() {
        let a = [1.0f32, 2.0];
        let b = [3.0f32, 4.0];
        let c = [5.0f32, 6.0];
        let mut out = [0.0f32; 2];

        cpu_reduce_into(&mut out, [&a[..], &b[..], &c[..]], ReduceOp::Sum).unwrap();
        assert_eq!(out, [9.0, 12.0]);
    }

    #[test]
    fn test_reduce_mean_and_extrema() {
        let a = [1.0f64, 8.0, -2.0];
        let b = [3.0f64, 4.0, -6.0];
        let mut out = [0.0f64; 3];

        cpu_reduce_into(&mut out, [&a[..], &b[..]], ReduceOp::Mean).unwrap();
        assert_eq!(out, [2.0, 6.0, -4.0]);

        cpu_reduce_into(&mut out, [&a[..], &b[..]], ReduceOp::Max).unwrap();
        assert_eq!(out, [3.0, 8.0, -2.0]);

        cpu_reduce_into(&mut out, [&a[..], &b[..]], ReduceOp::Min).unwrap();
        assert_eq!(out, [1.0, 4.0, -6.0]);
    }

    #[test]
    fn test_reduce_integers() {
        let a = [1i32, 2, 3];
        let b = [10i32, 20, 30];
        let mut out = [0i32; 3];

        cpu_reduce_into(&mut out, [&a[..], &b[..]], ReduceOp::Sum).unwrap();
        assert_eq!(out, [11, 22, 33]);
    }

    #[test]
    fn test_reduce_single_input_is_copy() {
        let a = [7.5f32, -1.0];
        let mut out = [0.0f32; 2];

        cpu_reduce_into(&mut out, [&a[..]], ReduceOp::Mean).unwrap();
        assert_eq!(out, a);
    }

    #[test]
    fn test_reduce_length_mismatch() {
        let a = [1.0f32, 2.0];
        let b = [1.0f32];
        let mut out = [0.0f32; 2];

        let err = cpu_reduce_into(&mut out, [&a[..], &b[..]], ReduceOp::Sum).unwrap_err();
        assert_eq!(
            err,
            KernelError::ShapeMismatch {
                expected: vec![2],
                got: vec![1]
            }
        );
    }

    #[test]
    fn test_reduce_empty() {
        let mut out = [0.0f32; 2];
        let inputs: [&[f32]; 0] = [];
        let err = cpu_reduce_into(&mut out, inputs, ReduceOp::Sum).unwrap_err();
        assert_eq!(err, KernelError::EmptyReduction);
    }

    #[test]
    fn test_copy() {
        let mut dst = [0u8; 3];
        cpu_copy(&mut dst, &[1, 2, 3]).unwrap();
        assert_eq!(dst, [1, 2, 3]);
        assert!(cpu_copy(&mut dst, &[1, 2]).is_err());
    }
}
