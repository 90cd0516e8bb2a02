use me_tensor::{DType, Shape};

use super::{check_same_shape, dims_i64, unsupported, FuncBuilder};
use crate::error::Result;
use crate::graph::{Graph, Node, NodeId, Op, ReduceKind};
use crate::mlir::{self, Stmt};

const DIALECT: &str = "tosa";

/// Coefficients of the erf approximation
/// `1 - 1 / (1 + a1|x| + a2|x|^2 + a3|x|^3 + a4|x|^4)^4`, max error 5e-4.
const ERF_COEFFS: [f32; 4] = [0.278393, 0.230389, 0.000972, 0.078108];

/// Lower a decomposed graph to a TOSA module.
pub fn lower(graph: &Graph) -> Result<mlir::Module> {
    let mut fb = FuncBuilder::new(graph, DIALECT);
    for node in graph.nodes() {
        if let Op::Parameter { .. } = node.op {
            continue;
        }
        let name = lower_node(&mut fb, graph, node)?;
        fb.bind(node.id, name);
    }
    fb.finish()
}

fn f32_type(shape: &Shape) -> String {
    mlir::tensor_type(shape, DType::F32)
}

fn typed(shape: &Shape, elem: &str) -> String {
    if shape.ndim() == 0 {
        format!("tensor<{elem}>")
    } else {
        format!("tensor<{}x{}>", shape.mlir_dims(), elem)
    }
}

/// TOSA op chains over SSA names rather than graph nodes.
impl FuncBuilder<'_> {
    fn constant(&mut self, value: f32, shape: &Shape) -> String {
        let stmt = Stmt::new("tosa.const").attr("value", mlir::dense_splat(value, shape));
        self.emit(stmt, f32_type(shape))
    }

    fn unary(&mut self, op: &str, x: &str, ty: &str) -> String {
        self.emit(Stmt::new(op).operand(x, ty), ty.to_string())
    }

    fn binary(&mut self, op: &str, a: &str, b: &str, ty: &str) -> String {
        let stmt = Stmt::new(op).operand(a, ty).operand(b, ty);
        self.emit(stmt, ty.to_string())
    }

    fn mul(&mut self, a: &str, b: &str, ty: &str) -> String {
        let stmt = Stmt::new("tosa.mul")
            .operand(a, ty)
            .operand(b, ty)
            .attr("shift", "0 : i8");
        self.emit(stmt, ty.to_string())
    }

    fn reshape(&mut self, x: &str, from: &str, to: &Shape, elem: &str) -> String {
        let stmt = Stmt::new("tosa.reshape")
            .operand(x, from)
            .attr("new_shape", mlir::array_i64(&dims_i64(to)));
        self.emit(stmt, typed(to, elem))
    }

    /// Division as reciprocal then multiply.
    fn div(&mut self, a: &str, b: &str, ty: &str) -> String {
        let recip = self.unary("tosa.reciprocal", b, ty);
        self.mul(a, &recip, ty)
    }

    /// Polynomial erf with the sign restored by a select on `x >= 0`.
    fn erf(&mut self, x: &str, shape: &Shape) -> String {
        let ty = f32_type(shape);
        let abs = self.unary("tosa.abs", x, &ty);
        let one = self.constant(1.0, shape);

        let mut power = abs.clone();
        let mut sum = one.clone();
        for (i, coeff) in ERF_COEFFS.iter().enumerate() {
            if i > 0 {
                power = self.mul(&power, &abs, &ty);
            }
            let c = self.constant(*coeff, shape);
            let term = self.mul(&c, &power, &ty);
            sum = self.binary("tosa.add", &sum, &term, &ty);
        }
        let recip = self.unary("tosa.reciprocal", &sum, &ty);
        let recip2 = self.mul(&recip, &recip, &ty);
        let recip4 = self.mul(&recip2, &recip2, &ty);
        let positive = self.binary("tosa.sub", &one, &recip4, &ty);

        let zero = self.constant(0.0, shape);
        let cond_ty = typed(shape, "i1");
        let cond = self.emit(
            Stmt::new("tosa.greater_equal")
                .operand(x, ty.as_str())
                .operand(zero, ty.as_str()),
            cond_ty.clone(),
        );
        let negative = self.unary("tosa.negate", &positive, &ty);
        let stmt = Stmt::new("tosa.select")
            .operand(cond, cond_ty)
            .operand(positive, ty.as_str())
            .operand(negative, ty.as_str());
        self.emit(stmt, ty)
    }

    /// Brings `id` to `shape` with a reshape unless it already has it.
    fn reshaped(&mut self, id: NodeId, shape: &Shape) -> Result<String> {
        let value = self.value(id)?;
        if self.shape_of(id) == shape {
            return Ok(value);
        }
        let from = self.type_of(id);
        let elem = self.dtype_of(id).to_string();
        Ok(self.reshape(&value, &from, shape, &elem))
    }
}

fn lower_node(fb: &mut FuncBuilder<'_>, graph: &Graph, node: &Node) -> Result<String> {
    let ty = mlir::tensor_type(&node.shape, node.dtype);
    let ops = &node.operands;
    let name = match &node.op {
        Op::Constant(t) => fb.emit(
            Stmt::new("tosa.const").attr("value", mlir::dense_tensor(t)),
            ty,
        ),
        Op::Splat(v) => fb.constant(*v, &node.shape),
        Op::Add | Op::Sub | Op::Mul | Op::Div => {
            check_same_shape(graph, node, DIALECT)?;
            let (a, b) = (fb.value(ops[0])?, fb.value(ops[1])?);
            match node.op {
                Op::Add => fb.binary("tosa.add", &a, &b, &ty),
                Op::Sub => fb.binary("tosa.sub", &a, &b, &ty),
                Op::Mul => fb.mul(&a, &b, &ty),
                _ => fb.div(&a, &b, &ty),
            }
        }
        Op::Exp => fb.emit_op("tosa.exp", ops, ty)?,
        Op::Rsqrt => fb.emit_op("tosa.rsqrt", ops, ty)?,
        Op::Erf => {
            let x = fb.value(ops[0])?;
            fb.erf(&x, &node.shape)
        }
        Op::Reshape => fb.reshaped(ops[0], &node.shape)?,
        Op::Transpose { perm } => {
            let perm: Vec<i64> = perm.iter().map(|&p| p as i64).collect();
            let perm_ty = format!("tensor<{}xi32>", perm.len());
            let perms = fb.emit(
                Stmt::new("tosa.const").attr("value", mlir::dense_i32(&perm)),
                perm_ty.clone(),
            );
            let stmt = Stmt::new("tosa.transpose")
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .operand(perms, perm_ty);
            fb.emit(stmt, ty)
        }
        Op::SliceRows { len } => {
            let mut size = dims_i64(fb.shape_of(ops[0]));
            size[0] = *len as i64;
            let start = vec![0; size.len()];
            let stmt = Stmt::new("tosa.slice")
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .attr("start", mlir::array_i64(&start))
                .attr("size", mlir::array_i64(&size));
            fb.emit(stmt, ty)
        }
        Op::Broadcast { dims } => lower_broadcast(fb, node, dims)?,
        Op::Reduce { kind, axis } => {
            let op = match kind {
                ReduceKind::Sum => "tosa.reduce_sum",
                ReduceKind::Max => "tosa.reduce_max",
            };
            // TOSA reductions keep the reduced axis with size 1.
            let mut kept = fb.shape_of(ops[0]).dims().to_vec();
            kept[*axis] = 1;
            let kept = Shape::new(kept);
            let stmt = Stmt::new(op)
                .operand(fb.value(ops[0])?, fb.type_of(ops[0]))
                .attr("axis", format!("{axis} : i64"));
            let reduced = fb.emit(stmt, f32_type(&kept));
            fb.reshape(&reduced, &f32_type(&kept), &node.shape, "f32")
        }
        Op::Dot => lower_dot(fb, node)?,
        Op::Embedding => lower_embedding(fb, node)?,
        other => return Err(unsupported(other, DIALECT)),
    };
    Ok(name)
}

/// `broadcast_in_dim` as a reshape to the target rank followed by a tile.
fn lower_broadcast(fb: &mut FuncBuilder<'_>, node: &Node, dims: &[usize]) -> Result<String> {
    let input = fb.shape_of(node.operands[0]);
    let target = &node.shape;

    let mut ranked = vec![1; target.ndim()];
    for (i, &d) in dims.iter().enumerate() {
        ranked[d] = input.dim(i);
    }
    let ranked = Shape::new(ranked);
    let multiples: Vec<i64> = target
        .dims()
        .iter()
        .zip(ranked.dims())
        .map(|(&t, &r)| if r == t { 1 } else { t as i64 })
        .collect();

    let value = fb.reshaped(node.operands[0], &ranked)?;
    if multiples.iter().all(|&m| m == 1) {
        return Ok(value);
    }
    let elem = node.dtype.to_string();
    let stmt = Stmt::new("tosa.tile")
        .operand(value, typed(&ranked, &elem))
        .attr("multiples", mlir::array_i64(&multiples));
    Ok(fb.emit(stmt, typed(target, &elem)))
}

/// `[..b, m, k] x [..b, k, n]` through a rank-3 `tosa.matmul`.
fn lower_dot(fb: &mut FuncBuilder<'_>, node: &Node) -> Result<String> {
    let (lhs, rhs) = (node.operands[0], node.operands[1]);
    let ls = fb.shape_of(lhs);
    let rs = fb.shape_of(rhs);
    let rank = ls.ndim();
    let batch: usize = ls.leading(2).iter().product();
    let (m, k, n) = (ls.dim(rank - 2), ls.dim(rank - 1), rs.dim(rank - 1));

    let lhs3 = Shape::new(vec![batch, m, k]);
    let rhs3 = Shape::new(vec![batch, k, n]);
    let out3 = Shape::new(vec![batch, m, n]);

    let a = fb.reshaped(lhs, &lhs3)?;
    let b = fb.reshaped(rhs, &rhs3)?;
    let stmt = Stmt::new("tosa.matmul")
        .operand(a, f32_type(&lhs3))
        .operand(b, f32_type(&rhs3));
    let product = fb.emit(stmt, f32_type(&out3));
    if out3 == node.shape {
        Ok(product)
    } else {
        Ok(fb.reshape(&product, &f32_type(&out3), &node.shape, "f32"))
    }
}

/// Embedding lookup through `tosa.gather`, which wants a rank-3 table and
/// rank-2 i32 indices.
fn lower_embedding(fb: &mut FuncBuilder<'_>, node: &Node) -> Result<String> {
    let (table, ids) = (node.operands[0], node.operands[1]);
    let ts = fb.shape_of(table);
    let count = fb.shape_of(ids).numel();
    let dim = ts.dim(1);

    let table3 = Shape::new(vec![1, ts.dim(0), dim]);
    let flat_ids = Shape::new(vec![1, count]);
    let gathered = Shape::new(vec![1, count, dim]);

    let table_value = fb.reshaped(table, &table3)?;
    let ids_value = fb.reshaped(ids, &flat_ids)?;
    let cast = fb.emit(
        Stmt::new("tosa.cast").operand(ids_value, typed(&flat_ids, "i64")),
        typed(&flat_ids, "i32"),
    );
    let stmt = Stmt::new("tosa.gather")
        .operand(table_value, f32_type(&table3))
        .operand(cast, typed(&flat_ids, "i32"));
    let value = fb.emit(stmt, f32_type(&gathered));
    Ok(fb.reshape(&value, &f32_type(&gathered), &node.shape, "f32"))
}
