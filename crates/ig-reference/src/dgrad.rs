use ig_conv::epilogue::EpilogueParams;
use ig_conv::numeric::{Accumulator, OutputElement, Promote};
use ig_conv::problem::Conv2dProblemSize;
use ig_tensor::{FilterRef, TensorRef, TensorRefMut};

/// Input-gradient oracle.
///
/// For each dx pixel, sums dy contributions over output channels and filter
/// taps, keeping only taps whose mapped output position lands on the stride
/// grid. Output channels are grouped by the dy layout's interleave so the
/// summation order matches the engine.
pub fn dgrad<E, F, A, D>(
    problem: &Conv2dProblemSize,
    dy: TensorRef<'_, E>,
    filter: FilterRef<'_, F>,
    bias: Option<&[A]>,
    residual: Option<TensorRef<'_, D>>,
    dx: &mut TensorRefMut<'_, D>,
    epilogue: &EpilogueParams<'_>,
) where
    E: Promote<A>,
    F: Promote<A>,
    A: Accumulator,
    D: OutputElement,
{
    let ep = epilogue.resolve();
    let g = dy.layout().interleave();
    let groups = dy.layout().channel_groups();

    for n in 0..problem.n {
        for c in 0..problem.c {
            for h in 0..problem.h {
                for w in 0..problem.w {
                    let mut acc = A::default();
                    for group in 0..groups {
                        for fh in 0..problem.r {
                            for fw in 0..problem.s {
                                let num_h = h as isize + problem.pad_h as isize
                                    - (fh * problem.dilation_h) as isize;
                                let num_w = w as isize + problem.pad_w as isize
                                    - (fw * problem.dilation_w) as isize;
                                let sh = problem.stride_h as isize;
                                let sw = problem.stride_w as isize;
                                if num_h < 0
                                    || num_w < 0
                                    || num_h % sh != 0
                                    || num_w % sw != 0
                                    || num_h / sh >= problem.p as isize
                                    || num_w / sw >= problem.q as isize
                                {
                                    continue;
                                }
                                let (p, q) = ((num_h / sh) as usize, (num_w / sw) as usize);
                                let (tr, ts) = problem.filter_tap(fh, fw);
                                for lane in 0..g {
                                    let k = group * g + lane;
                                    acc = acc.mul_add(
                                        filter.at(k, c, tr, ts).promote(),
                                        dy.at(n, k, p, q).promote(),
                                    );
                                }
                            }
                        }
                    }
                    let bias_v = match bias {
                        Some(b) if ep.is_bias_needed() => b[c].into_compute(),
                        _ => 0.0,
                    };
                    let res_v = match residual {
                        Some(r) if ep.is_source_needed() => r.at(n, c, h, w).to_compute(),
                        _ => 0.0,
                    };
                    dx.set(n, c, h, w, ep.apply(acc, bias_v, res_v));
                }
            }
        }
    }
}
