//! Linear program assembly and the solver seam.
//!
//! [`LinearProgram`] is a plain container: a cost per variable, variable
//! bounds and rows `sum(a_i * x_i) {<=, >=, =} rhs`. Solving goes through
//! [`LpSolver`] so the path optimizer never depends on a particular engine.

use crate::error::SolveFailure;
use std::collections::BTreeMap;

/// Handle to a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(usize);

impl Var {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// `sum(coeff * var) + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: BTreeMap<Var, f64>,
    constant: f64,
}

impl LinearExpr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn var(var: Var) -> Self {
        let mut expr = Self::zero();
        expr.add_term(var, 1.0);
        expr
    }

    /// Add `coeff * var`, merging with an existing term for `var`.
    pub fn add_term(&mut self, var: Var, coeff: f64) {
        if coeff == 0.0 {
            return;
        }
        let entry = self.terms.entry(var).or_insert(0.0);
        *entry += coeff;
        if *entry == 0.0 {
            self.terms.remove(&var);
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// `self += scale * other`.
    pub fn add_scaled(&mut self, other: &LinearExpr, scale: f64) {
        if scale == 0.0 {
            return;
        }
        for (&var, &coeff) in &other.terms {
            self.add_term(var, scale * coeff);
        }
        self.constant += scale * other.constant;
    }

    pub fn scaled(&self, scale: f64) -> LinearExpr {
        let mut out = LinearExpr::zero();
        out.add_scaled(self, scale);
        out
    }

    pub fn terms(&self) -> impl Iterator<Item = (Var, f64)> + '_ {
        self.terms.iter().map(|(&v, &c)| (v, c))
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    /// True when no variable appears.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Value under a full assignment.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.constant + self.terms().map(|(v, c)| c * values[v.0]).sum::<f64>()
    }
}

/// Row sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

/// `sum(coeff * var) relation rhs`, constants already moved to the right.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub terms: Vec<(Var, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

/// Minimisation problem `min c^T x` subject to rows and bounds.
#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    costs: Vec<f64>,
    bounds: Vec<(f64, f64)>,
    constraints: Vec<Constraint>,
    /// A row without variables was violated
    trivially_infeasible: bool,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// New variable with objective coefficient `cost` and bounds `(lo, hi)`
    /// (either may be infinite).
    pub fn add_var(&mut self, cost: f64, bounds: (f64, f64)) -> Var {
        self.costs.push(cost);
        self.bounds.push(bounds);
        Var(self.costs.len() - 1)
    }

    /// Add `expr relation rhs`. The expression's constant is folded into the rhs.
    /// A row without variables is checked immediately instead of stored.
    pub fn add_constraint(&mut self, expr: &LinearExpr, relation: Relation, rhs: f64) {
        let rhs = rhs - expr.constant_part();
        let terms: Vec<(Var, f64)> = expr.terms().collect();
        if terms.is_empty() {
            let holds = match relation {
                Relation::Le => 0.0 <= rhs,
                Relation::Ge => 0.0 >= rhs,
                Relation::Eq => rhs == 0.0,
            };
            self.trivially_infeasible |= !holds;
            return;
        }
        self.constraints.push(Constraint {
            terms,
            relation,
            rhs,
        });
    }

    /// Non-negative slack `s` with `expr <= s` and `-expr <= s`, costing `weight * s`.
    /// At the optimum `s = |expr|`.
    pub fn add_abs_penalty(&mut self, expr: &LinearExpr, weight: f64) -> Option<Var> {
        if weight <= 0.0 {
            return None;
        }
        let slack = self.add_var(weight, (0.0, f64::INFINITY));
        let mut upper = expr.clone();
        upper.add_term(slack, -1.0);
        self.add_constraint(&upper, Relation::Le, 0.0);
        let mut lower = expr.scaled(-1.0);
        lower.add_term(slack, -1.0);
        self.add_constraint(&lower, Relation::Le, 0.0);
        Some(slack)
    }

    pub fn num_vars(&self) -> usize {
        self.costs.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// True if a constant row was already violated when added.
    pub fn is_trivially_infeasible(&self) -> bool {
        self.trivially_infeasible
    }
}

/// Primal solution.
#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    pub values: Vec<f64>,
    pub objective: f64,
}

impl LpSolution {
    pub fn value(&self, var: Var) -> f64 {
        self.values[var.0]
    }
}

/// Black-box LP engine.
pub trait LpSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Solve to optimality or report why no optimum exists.
    fn solve(&self, program: &LinearProgram) -> Result<LpSolution, SolveFailure>;
}

/// Dense simplex solver backed by `minilp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplexSolver;

impl LpSolver for SimplexSolver {
    fn name(&self) -> &'static str {
        "minilp_simplex"
    }

    fn solve(&self, program: &LinearProgram) -> Result<LpSolution, SolveFailure> {
        if program.is_trivially_infeasible() {
            return Err(SolveFailure::Infeasible);
        }
        let mut problem = minilp::Problem::new(minilp::OptimizationDirection::Minimize);
        let vars: Vec<minilp::Variable> = program
            .costs
            .iter()
            .zip(&program.bounds)
            .map(|(&cost, &bounds)| problem.add_var(cost, bounds))
            .collect();

        for row in &program.constraints {
            let mut expr = minilp::LinearExpr::empty();
            for &(var, coeff) in &row.terms {
                expr.add(vars[var.0], coeff);
            }
            let op = match row.relation {
                Relation::Le => minilp::ComparisonOp::Le,
                Relation::Ge => minilp::ComparisonOp::Ge,
                Relation::Eq => minilp::ComparisonOp::Eq,
            };
            problem.add_constraint(expr, op, row.rhs);
        }

        let solution = problem.solve().map_err(|e| match e {
            minilp::Error::Infeasible => SolveFailure::Infeasible,
            minilp::Error::Unbounded => SolveFailure::Unbounded,
        })?;

        let values: Vec<f64> = vars.iter().map(|&v| solution[v]).collect();
        Ok(LpSolution {
            objective: solution.objective(),
            values,
        })
    }
}
