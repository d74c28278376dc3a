use ig_conv::epilogue::EpilogueParams;
use ig_conv::numeric::{Accumulator, OutputElement, Promote};
use ig_conv::problem::Conv2dProblemSize;
use ig_tensor::{FilterRef, TensorRef, TensorRefMut};

/// Forward convolution oracle.
///
/// The reduction over input channels follows the source layout's interleave
/// grouping so the summation order matches the tiled engine exactly.
pub fn fprop<E, F, A, D>(
    problem: &Conv2dProblemSize,
    src: TensorRef<'_, E>,
    filter: FilterRef<'_, F>,
    bias: Option<&[A]>,
    residual: Option<TensorRef<'_, D>>,
    out: &mut TensorRefMut<'_, D>,
    epilogue: &EpilogueParams<'_>,
) where
    E: Promote<A>,
    F: Promote<A>,
    A: Accumulator,
    D: OutputElement,
{
    let ep = epilogue.resolve();
    let g = src.layout().interleave();
    let groups = src.layout().channel_groups();

    for n in 0..problem.n {
        for k in 0..problem.k {
            for p in 0..problem.p {
                for q in 0..problem.q {
                    let mut acc = A::default();
                    for group in 0..groups {
                        for fh in 0..problem.r {
                            for fw in 0..problem.s {
                                let h = (p * problem.stride_h + fh * problem.dilation_h) as isize
                                    - problem.pad_h as isize;
                                let w = (q * problem.stride_w + fw * problem.dilation_w) as isize
                                    - problem.pad_w as isize;
                                if h < 0
                                    || h >= problem.h as isize
                                    || w < 0
                                    || w >= problem.w as isize
                                {
                                    continue;
                                }
                                let (tr, ts) = problem.filter_tap(fh, fw);
                                for lane in 0..g {
                                    let c = group * g + lane;
                                    acc = acc.mul_add(
                                        filter.at(k, c, tr, ts).promote(),
                                        src.at(n, c, h as usize, w as usize).promote(),
                                    );
                                }
                            }
                        }
                    }
                    let bias_v = match bias {
                        Some(b) if ep.is_bias_needed() => b[k].into_compute(),
                        _ => 0.0,
                    };
                    let res_v = match residual {
                        Some(r) if ep.is_source_needed() => r.at(n, k, p, q).to_compute(),
                        _ => 0.0,
                    };
                    out.set(n, k, p, q, ep.apply(acc, bias_v, res_v));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ig_conv::problem::ConvMode;
    use ig_tensor::{FilterLayout, FilterTensor, Layout, Tensor};

    #[test]
    fn test_box_filter_sums_window() {
        // 3x3 all-ones filter, no padding: each output is the window sum.
        let p = Conv2dProblemSize::simple(1, 1, 4, 4, 1, 3, 3, 0, 1, ConvMode::CrossCorrelation)
            .unwrap();
        let mut x = Tensor::<f32>::zeros(Layout::nchw(1, 1, 4, 4));
        for (i, v) in x.data_mut().iter_mut().enumerate() {
            *v = i as f32;
        }
        let w = FilterTensor::<f32>::new(vec![1.0; 9], FilterLayout::kcrs(1, 1, 3, 3));
        let mut out = Tensor::<f32>::zeros(Layout::nchw(1, 1, 2, 2));

        fprop(
            &p,
            x.as_ref(),
            w.as_ref(),
            None,
            None,
            &mut out.as_mut(),
            &EpilogueParams::scale(1.0),
        );

        let window_sum = |h0: usize, w0: usize| -> f32 {
            (0..3)
                .flat_map(|i| (0..3).map(move |j| (i, j)))
                .map(|(i, j)| x.at(0, 0, h0 + i, w0 + j))
                .sum()
        };
        assert_eq!(out.at(0, 0, 0, 0), window_sum(0, 0));
        assert_eq!(out.at(0, 0, 1, 1), window_sum(1, 1));
    }

    #[test]
    fn test_convolution_mode_flips_filter() {
        let p =
            Conv2dProblemSize::simple(1, 1, 3, 3, 1, 3, 3, 0, 1, ConvMode::Convolution).unwrap();
        let mut w = FilterTensor::<f32>::zeros(FilterLayout::kcrs(1, 1, 3, 3));
        w.set(0, 0, 0, 0, 1.0); // only the (0, 0) filter element
        let mut x = Tensor::<f32>::zeros(Layout::nchw(1, 1, 3, 3));
        for (i, v) in x.data_mut().iter_mut().enumerate() {
            *v = i as f32;
        }
        let mut out = Tensor::<f32>::zeros(Layout::nchw(1, 1, 1, 1));

        fprop(
            &p,
            x.as_ref(),
            w.as_ref(),
            None,
            None,
            &mut out.as_mut(),
            &EpilogueParams::scale(1.0),
        );
        // Flipped: filter element (0, 0) pairs with source tap (2, 2).
        assert_eq!(out.at(0, 0, 0, 0), x.at(0, 0, 2, 2));
    }

    use ig_conv::{Activation, Convolution, KernelConfig, PipelineStages, TileShape};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fill_f32(data: &mut [f32], rng: &mut StdRng) {
        for v in data.iter_mut() {
            *v = rng.gen_range(-2.0..2.0);
        }
    }

    fn fill_i8(data: &mut [i8], rng: &mut StdRng) {
        for v in data.iter_mut() {
            *v = rng.gen_range(-8..8);
        }
    }

    #[test]
    fn test_tiled_engine_matches_bitwise() {
        let mut rng = StdRng::seed_from_u64(7);
        for mode in [ConvMode::CrossCorrelation, ConvMode::Convolution] {
            let p = Conv2dProblemSize::simple(2, 4, 5, 5, 3, 3, 3, 1, 1, mode).unwrap();
            let mut src = Tensor::<f32>::zeros(Layout::nchw(2, 4, 5, 5));
            fill_f32(src.data_mut(), &mut rng);
            let mut w = FilterTensor::<f32>::zeros(FilterLayout::kcrs(3, 4, 3, 3));
            fill_f32(w.data_mut(), &mut rng);

            let conv = Convolution::with_default_config(p);
            let mut out = Tensor::<f32>::zeros(Layout::nchw(2, 3, 5, 5));
            conv.fprop(
                src.as_ref(),
                w.as_ref(),
                None,
                None,
                &mut out.as_mut(),
                &EpilogueParams::scale(1.0),
            )
            .unwrap();

            let mut expected = Tensor::<f32>::zeros(Layout::nchw(2, 3, 5, 5));
            fprop(
                &p,
                src.as_ref(),
                w.as_ref(),
                None,
                None,
                &mut expected.as_mut(),
                &EpilogueParams::scale(1.0),
            );
            // Same reduction order, so bitwise equality.
            assert_eq!(out.data(), expected.data());
        }
    }

    #[test]
    fn test_tiled_engine_interleaved_layouts() {
        let mut rng = StdRng::seed_from_u64(13);
        let p = Conv2dProblemSize::simple(1, 8, 6, 6, 4, 3, 3, 1, 1, ConvMode::CrossCorrelation)
            .unwrap();
        let src_layout = Layout::ncxhwx(1, 8, 6, 6, 4).unwrap();
        let w_layout = FilterLayout::kcrsx(4, 8, 3, 3, 4).unwrap();
        let out_layout = Layout::ncxhwx(1, 4, 6, 6, 4).unwrap();

        let mut src = Tensor::<f32>::zeros(src_layout);
        fill_f32(src.data_mut(), &mut rng);
        let mut w = FilterTensor::<f32>::zeros(w_layout);
        fill_f32(w.data_mut(), &mut rng);

        let config =
            KernelConfig::for_interleave(TileShape::new(4, 8, 4), PipelineStages::Double, 4);
        let conv = Convolution::new(p, config);
        let mut out = Tensor::<f32>::zeros(out_layout);
        conv.fprop(
            src.as_ref(),
            w.as_ref(),
            None,
            None,
            &mut out.as_mut(),
            &EpilogueParams::scale(1.0),
        )
        .unwrap();

        let mut expected = Tensor::<f32>::zeros(out_layout);
        fprop(
            &p,
            src.as_ref(),
            w.as_ref(),
            None,
            None,
            &mut expected.as_mut(),
            &EpilogueParams::scale(1.0),
        );
        assert_eq!(out.data(), expected.data());
    }

    #[test]
    fn test_tiled_engine_int8_pipeline() {
        let mut rng = StdRng::seed_from_u64(31);
        for pad in [0usize, 1] {
            let p =
                Conv2dProblemSize::simple(1, 4, 5, 5, 2, 3, 3, pad, 1, ConvMode::CrossCorrelation)
                    .unwrap();
            let mut src = Tensor::<i8>::zeros(Layout::nchw(1, 4, 5, 5));
            fill_i8(src.data_mut(), &mut rng);
            let mut w = FilterTensor::<i8>::zeros(FilterLayout::kcrs(2, 4, 3, 3));
            fill_i8(w.data_mut(), &mut rng);
            let bias: Vec<i32> = vec![12, -7];
            let ep = EpilogueParams::new(0.4, 1.0, 0.0)
                .with_activation(Activation::ReluThreshold(0.0));

            let conv = Convolution::with_default_config(p);
            let out_layout = Layout::nchw(1, 2, p.p, p.q);
            let mut out = Tensor::<i8>::zeros(out_layout);
            conv.fprop(
                src.as_ref(),
                w.as_ref(),
                Some(&bias),
                None,
                &mut out.as_mut(),
                &ep,
            )
            .unwrap();

            let mut expected = Tensor::<i8>::zeros(out_layout);
            fprop(
                &p,
                src.as_ref(),
                w.as_ref(),
                Some(&bias),
                None,
                &mut expected.as_mut(),
                &ep,
            );
            assert_eq!(out.data(), expected.data(), "pad {}", pad);
            // ReLU holds on the narrowed output too.
            assert!(out.data().iter().all(|&v| v >= 0));
        }
    }

    #[test]
    fn test_tiled_engine_residual_fused() {
        let mut rng = StdRng::seed_from_u64(37);
        let p = Conv2dProblemSize::simple(1, 2, 4, 4, 2, 3, 3, 1, 1, ConvMode::CrossCorrelation)
            .unwrap();
        let mut src = Tensor::<f32>::zeros(Layout::nchw(1, 2, 4, 4));
        fill_f32(src.data_mut(), &mut rng);
        let mut w = FilterTensor::<f32>::zeros(FilterLayout::kcrs(2, 2, 3, 3));
        fill_f32(w.data_mut(), &mut rng);
        let mut residual = Tensor::<f32>::zeros(Layout::nchw(1, 2, 4, 4));
        fill_f32(residual.data_mut(), &mut rng);
        let bias = vec![0.5f32, -0.25];
        let ep = EpilogueParams::new(1.0, 1.0, 0.75);

        let conv = Convolution::with_default_config(p);
        let mut out = Tensor::<f32>::zeros(Layout::nchw(1, 2, 4, 4));
        conv.fprop(
            src.as_ref(),
            w.as_ref(),
            Some(&bias),
            Some(residual.as_ref()),
            &mut out.as_mut(),
            &ep,
        )
        .unwrap();

        let mut expected = Tensor::<f32>::zeros(Layout::nchw(1, 2, 4, 4));
        fprop(
            &p,
            src.as_ref(),
            w.as_ref(),
            Some(&bias),
            Some(residual.as_ref()),
            &mut expected.as_mut(),
            &ep,
        );
        assert_eq!(out.data(), expected.data());
    }
}
