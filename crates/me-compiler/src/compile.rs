use me_tensor::{Module, Tensor};

use crate::decompose::decompose;
use crate::error::{CompileError, Result};
use crate::graph::Graph;
use crate::lower;
use crate::module::{IrModule, OutputType, TracingMode};
use crate::tracer::Tracer;

/// Run `module.forward` once on `example` and record the ops it performs.
///
/// The example only fixes the parameter's shape and dtype; its contents
/// do not appear in the graph.
pub fn trace<M: Module>(module: &M, example: &Tensor) -> Result<Graph> {
    let mut tracer = Tracer::new(module.name());
    let input = tracer.parameter(example);
    let output = module.forward(&mut tracer, &input)?;
    Ok(tracer.finish(&[output]))
}

/// Compile `module` into `output_type` text, using `example` as the
/// traced input.
pub fn compile<M: Module>(
    module: &M,
    example: &Tensor,
    output_type: OutputType,
    mode: TracingMode,
) -> Result<IrModule> {
    if mode != TracingMode::Trace {
        return Err(CompileError::UnsupportedTracingMode(mode.to_string()));
    }

    tracing::info!(
        "tracing '{}' with input {} ({})",
        module.name(),
        example.shape(),
        example.dtype()
    );
    let graph = trace(module, example)?.prune();
    let histogram: Vec<String> = graph
        .op_histogram()
        .into_iter()
        .map(|(op, n)| format!("{op}={n}"))
        .collect();
    tracing::debug!("traced {} nodes: {}", graph.len(), histogram.join(" "));

    let text = match output_type {
        OutputType::Raw => graph.to_string(),
        OutputType::Mhlo => lower::mhlo::lower(&decompose(&graph))?.to_string(),
        OutputType::Tosa => lower::tosa::lower(&decompose(&graph))?.to_string(),
    };
    tracing::info!("lowered to {output_type} ({} bytes)", text.len());
    Ok(IrModule::new(output_type, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use me_model::synthetic::{write_model_dir, SyntheticSpec};
    use me_model::{MaskedLmWrapper, ModelProvider};
    use me_tensor::{CpuBackend, Eager, Shape, TensorError};

    fn wrapper(dir: &std::path::Path) -> MaskedLmWrapper {
        write_model_dir(dir, &SyntheticSpec::default()).unwrap();
        let provider = ModelProvider::new().with_hub_cache(None);
        MaskedLmWrapper::new(&provider, dir.to_str().unwrap()).unwrap()
    }

    fn ids(batch: usize, seq_len: usize) -> Tensor {
        let data = (0..batch * seq_len).map(|i| (i * 5 % 32) as i64).collect();
        Tensor::from_i64(data, Shape::new(vec![batch, seq_len])).unwrap()
    }

    #[test]
    fn test_mhlo_signature() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = wrapper(dir.path());
        w.eval();
        let ir = compile(&w, &ids(2, 8), OutputType::Mhlo, TracingMode::Trace).unwrap();
        let text = ir.to_text();

        assert_eq!(ir.output_type(), OutputType::Mhlo);
        assert!(text.starts_with(
            "module attributes {torch.debug_module_name = \"BertForMaskedLM\"} {\n"
        ));
        assert!(text.contains("func.func @forward(%arg0: tensor<2x8xi64>) -> tensor<2x8x32xf32> {"));
        assert!(text.contains("\"mhlo.gather\""));
        assert!(text.contains("\"chlo.erf\""));
        assert!(text.contains("return %"));
        assert!(!text.contains("%undefined"));
    }

    #[test]
    fn test_tosa_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = wrapper(dir.path());
        w.eval();
        let ir = compile(&w, &ids(1, 4), OutputType::Tosa, TracingMode::Trace).unwrap();
        let text = ir.to_text();
        assert!(text.contains("func.func @forward(%arg0: tensor<1x4xi64>) -> tensor<1x4x32xf32> {"));
        assert!(text.contains("\"tosa.gather\""));
        assert!(text.contains("\"tosa.matmul\""));
        assert!(!text.contains("mhlo."));
        assert!(!text.contains("%undefined"));
    }

    #[test]
    fn test_raw_is_graph_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = wrapper(dir.path());
        w.eval();
        let ir = compile(&w, &ids(1, 4), OutputType::Raw, TracingMode::Trace).unwrap();
        assert!(ir.to_text().starts_with("graph @BertForMaskedLM(%0: tensor<1x4xi64>)"));
        assert!(ir.to_text().contains("softmax"));
    }

    #[test]
    fn test_script_mode_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let w = wrapper(dir.path());
        let err = compile(&w, &ids(1, 4), OutputType::Mhlo, TracingMode::Script).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedTracingMode(ref m) if m == "script"));
    }

    #[test]
    fn test_train_mode_dropout_fails_tracing() {
        let dir = tempfile::tempdir().unwrap();
        let w = wrapper(dir.path());
        let err = compile(&w, &ids(1, 4), OutputType::Mhlo, TracingMode::Trace).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Tracing(TensorError::Unsupported { ref op }) if op == "dropout"
        ));
    }

    #[test]
    fn test_replay_matches_eager() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = wrapper(dir.path());
        w.eval();
        let input = ids(2, 5);
        let graph = trace(&w, &input).unwrap();

        let backend = CpuBackend::new();
        let replayed = graph
            .replay(&mut Eager::new(&backend), &[input.clone()])
            .unwrap();
        let direct = w.forward(&mut Eager::new(&backend), &input).unwrap();

        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].shape(), direct.shape());
        for (a, b) in replayed[0]
            .data_f32()
            .unwrap()
            .iter()
            .zip(direct.data_f32().unwrap())
        {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_trace_ignores_input_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = wrapper(dir.path());
        w.eval();
        let zeros = Tensor::from_i64(vec![0; 8], Shape::new(vec![2, 4])).unwrap();
        let a = compile(&w, &zeros, OutputType::Mhlo, TracingMode::Trace).unwrap();
        let b = compile(&w, &ids(2, 4), OutputType::Mhlo, TracingMode::Trace).unwrap();
        assert_eq!(a, b);
    }
}
