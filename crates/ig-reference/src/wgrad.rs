use ig_conv::epilogue::EpilogueParams;
use ig_conv::numeric::{Accumulator, OutputElement, Promote};
use ig_conv::problem::Conv2dProblemSize;
use ig_tensor::{FilterRef, FilterRefMut, TensorRef};

/// Weight-gradient oracle.
///
/// Reduces over every output pixel of the batch in (n, p, q) order, matching
/// the engine's reduction traversal. In convolution mode the source read is
/// taken at the flipped tap while the result lands at the unflipped filter
/// element.
pub fn wgrad<E, F, A, D>(
    problem: &Conv2dProblemSize,
    dy: TensorRef<'_, E>,
    x: TensorRef<'_, F>,
    bias: Option<&[A]>,
    residual: Option<FilterRef<'_, D>>,
    dw: &mut FilterRefMut<'_, D>,
    epilogue: &EpilogueParams<'_>,
) where
    E: Promote<A>,
    F: Promote<A>,
    A: Accumulator,
    D: OutputElement,
{
    let ep = epilogue.resolve();

    for k in 0..problem.k {
        for c in 0..problem.c {
            for fh in 0..problem.r {
                for fw in 0..problem.s {
                    let (tr, ts) = problem.filter_tap(fh, fw);
                    let mut acc = A::default();
                    for n in 0..problem.n {
                        for p in 0..problem.p {
                            for q in 0..problem.q {
                                let h = (p * problem.stride_h + tr * problem.dilation_h) as isize
                                    - problem.pad_h as isize;
                                let w = (q * problem.stride_w + ts * problem.dilation_w) as isize
                                    - problem.pad_w as isize;
                                if h < 0
                                    || h >= problem.h as isize
                                    || w < 0
                                    || w >= problem.w as isize
                                {
                                    continue;
                                }
                                acc = acc.mul_add(
                                    dy.at(n, k, p, q).promote(),
                                    x.at(n, c, h as usize, w as usize).promote(),
                                );
                            }
                        }
                    }
                    let bias_v = match bias {
                        Some(b) if ep.is_bias_needed() => b[k].into_compute(),
                        _ => 0.0,
                    };
                    let res_v = match residual {
                        Some(r) if ep.is_source_needed() => r.at(k, c, fh, fw).to_compute(),
                        _ => 0.0,
                    };
                    dw.set(k, c, fh, fw, ep.apply(acc, bias_v, res_v));
                }
            }
        }
    }
}
