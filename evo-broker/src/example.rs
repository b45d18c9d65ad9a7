//! This module contains an example payload and a small evolutionary driver to demonstrate
//! practical usage of evo-broker crate.

#[cfg(test)]
#[path = "../tests/unit/example_test.rs"]
mod example_test;

use crate::executor::Executor;
use crate::item::{Payload, WorkItem};
use crate::utils::{Environment, GenericError, GenericResult, Noise, Timer};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// An objective function which calculates a fitness of a vector.
pub type FitnessFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Specifies a benchmark function used as fitness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// Rosenbrock function.
    Rosenbrock,
    /// Sphere function.
    Sphere,
    /// Rastrigin function.
    Rastrigin,
}

impl FunctionKind {
    /// Creates a fitness function.
    pub fn create(&self) -> FitnessFn {
        match self {
            FunctionKind::Rosenbrock => create_rosenbrock_function(),
            FunctionKind::Sphere => create_sphere_function(),
            FunctionKind::Rastrigin => create_rastrigin_function(),
        }
    }

    /// Returns a minimal supported dimension.
    pub fn min_dimension(&self) -> usize {
        match self {
            FunctionKind::Rosenbrock => 2,
            FunctionKind::Sphere | FunctionKind::Rastrigin => 1,
        }
    }
}

impl FromStr for FunctionKind {
    type Err = GenericError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rosenbrock" => Ok(FunctionKind::Rosenbrock),
            "sphere" => Ok(FunctionKind::Sphere),
            "rastrigin" => Ok(FunctionKind::Rastrigin),
            _ => Err(format!("unknown function: '{value}'").into()),
        }
    }
}

/// An example payload: a vector which fitness is calculated by one of benchmark functions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorSolution {
    /// Solution data.
    pub data: Vec<f64>,
    function: FunctionKind,
    fitness: Option<f64>,
    delay_ms: u64,
}

impl VectorSolution {
    /// Creates a new instance of `VectorSolution`.
    pub fn new(data: Vec<f64>, function: FunctionKind) -> Self {
        Self { data, function, fitness: None, delay_ms: 0 }
    }

    /// Sets an artificial delay applied on each evaluation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    /// Returns a fitness value if solution is evaluated.
    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    /// Returns fitness function kind.
    pub fn function(&self) -> FunctionKind {
        self.function
    }
}

impl Payload for VectorSolution {
    fn process(&mut self) -> GenericResult<()> {
        if self.data.len() < self.function.min_dimension() {
            let (function, min_dimension) = (self.function, self.function.min_dimension());
            return Err(format!("{function:?} function needs at least {min_dimension} dimension(s)").into());
        }

        if self.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.delay_ms));
        }

        let fitness = self.function.create().deref()(self.data.as_slice());
        if !fitness.is_finite() {
            return Err(format!("fitness is not finite: {fitness}").into());
        }

        self.fitness = Some(fitness);

        Ok(())
    }
}

/// Specifies mode of mutation operator.
pub enum MutationMode {
    /// Adds some noise to all dimensions.
    JustNoise(Noise),
    /// Adds some noise to specific dimensions.
    DimensionNoise(Noise, FxHashSet<usize>),
}

impl MutationMode {
    fn mutate(&self, data: &[f64]) -> Vec<f64> {
        match self {
            MutationMode::JustNoise(noise) => noise.generate_multi(data.iter().copied()).collect(),
            MutationMode::DimensionNoise(noise, dimens) => data
                .iter()
                .enumerate()
                .map(|(idx, d)| if dimens.contains(&idx) { noise.generate(*d) } else { *d })
                .collect(),
        }
    }
}

/// A result of evolution run.
#[derive(Clone, Debug, Serialize)]
pub struct EvolutionResult {
    /// The best solution found.
    pub best: Vec<f64>,
    /// Fitness of the best solution.
    pub fitness: f64,
    /// Amount of generations.
    pub generations: usize,
    /// Amount of processed items.
    pub evaluations: usize,
    /// Amount of items which have failed or have not returned.
    pub failures: usize,
}

/// A (mu + lambda) evolutionary algorithm which evaluates offspring through an executor.
pub struct Evolution {
    environment: Arc<Environment>,
    function: FunctionKind,
    initial_solutions: Vec<Vec<f64>>,
    parents: usize,
    offspring: usize,
    max_time: Option<Duration>,
    max_generations: Option<usize>,
    target_fitness: Option<f64>,
    operators: Vec<(MutationMode, f64)>,
    delay: Duration,
    log_best: usize,
    is_stopped: Option<Arc<AtomicBool>>,
}

impl Evolution {
    /// Creates a new instance of `Evolution`.
    pub fn new(function: FunctionKind, environment: Arc<Environment>) -> Self {
        Self {
            environment,
            function,
            initial_solutions: vec![],
            parents: 4,
            offspring: 16,
            max_time: None,
            max_generations: Some(100),
            target_fitness: None,
            operators: vec![],
            delay: Duration::ZERO,
            log_best: 10,
            is_stopped: None,
        }
    }

    /// Sets initial solutions.
    pub fn with_init_solutions(mut self, init_solutions: Vec<Vec<f64>>) -> Self {
        self.initial_solutions = init_solutions;
        self
    }

    /// Sets amount of parents (mu) and offspring (lambda).
    pub fn with_sizes(mut self, parents: usize, offspring: usize) -> Self {
        self.parents = parents.max(1);
        self.offspring = offspring.max(1);
        self
    }

    /// Sets termination parameters.
    pub fn with_termination(
        mut self,
        max_time: Option<Duration>,
        max_generations: Option<usize>,
        target_fitness: Option<f64>,
    ) -> Self {
        self.max_time = max_time;
        self.max_generations = max_generations;
        self.target_fitness = target_fitness;
        self
    }

    /// Adds mutation operator applied with given probability.
    pub fn with_operator(mut self, mode: MutationMode, probability: f64) -> Self {
        self.operators.push((mode, probability));
        self
    }

    /// Sets an artificial delay of each evaluation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets how often (in generations) the best solution is logged. Zero disables it.
    pub fn with_log_best(mut self, log_best: usize) -> Self {
        self.log_best = log_best;
        self
    }

    /// Sets a flag which interrupts evolution.
    pub fn with_stop_flag(mut self, is_stopped: Arc<AtomicBool>) -> Self {
        self.is_stopped = Some(is_stopped);
        self
    }

    /// Runs evolution using given executor to evaluate solutions.
    pub fn run<E: Executor<VectorSolution>>(self, executor: &mut E) -> GenericResult<EvolutionResult> {
        if self.initial_solutions.is_empty() {
            return Err("initial solutions must be set".into());
        }

        if self.operators.is_empty() {
            return Err("at least one mutation operator must be set".into());
        }

        let timer = Timer::start();
        let mut result =
            EvolutionResult { best: vec![], fitness: f64::MAX, generations: 0, evaluations: 0, failures: 0 };

        let initial = self.initial_solutions.iter().map(|data| self.create_solution(data.clone())).collect();
        let mut parents = self.evaluate(executor, initial, &mut result)?;

        if parents.is_empty() {
            return Err(if self.is_stopped() {
                "evolution is interrupted before any initial solution is evaluated".into()
            } else {
                "no initial solution has been evaluated".into()
            });
        }

        self.select(&mut parents);
        self.log(&format!(
            "[{}s] evaluated {} initial solution(s), best fitness: {:.7}",
            timer.elapsed_secs(),
            parents.len(),
            get_fitness(&parents[0])
        ));

        while !self.is_terminated(&timer, result.generations, get_fitness(&parents[0])) {
            let offspring = (0..self.offspring).map(|_| self.create_offspring(parents.as_slice())).collect();
            let evaluated = self.evaluate(executor, offspring, &mut result)?;

            parents.extend(evaluated);
            self.select(&mut parents);
            result.generations += 1;

            if self.log_best > 0 && result.generations % self.log_best == 0 {
                self.log(&format!(
                    "[{}s] generation {}, best fitness: {:.7}",
                    timer.elapsed_secs(),
                    result.generations,
                    get_fitness(&parents[0])
                ));
            }
        }

        let best = parents.swap_remove(0);
        result.fitness = get_fitness(&best);
        result.best = best.data;

        self.log(&format!(
            "[{}s] total generations: {}, speed: {:.2} gen/sec, evaluations: {}, failures: {}",
            timer.elapsed_secs(),
            result.generations,
            result.generations as f64 / timer.elapsed_secs_as_float().max(f64::EPSILON),
            result.evaluations,
            result.failures
        ));

        Ok(result)
    }

    fn evaluate<E: Executor<VectorSolution>>(
        &self,
        executor: &mut E,
        solutions: Vec<VectorSolution>,
        result: &mut EvolutionResult,
    ) -> GenericResult<Vec<VectorSolution>> {
        let mut population = solutions.into_iter().map(WorkItem::new).collect::<Vec<_>>();
        let evaluation = executor.work_on(population.as_mut_slice())?;

        result.failures += evaluation.pending.len();

        let evaluated = evaluation
            .evaluated
            .iter()
            .map(|&slot| population[slot].clone())
            .chain(evaluation.late.into_iter())
            .filter(|item| {
                let is_processed = item.is_processed();
                if !is_processed {
                    result.failures += 1;
                }
                is_processed
            })
            .map(|item| item.into_payload())
            .filter(|solution| solution.fitness().is_some())
            .collect::<Vec<_>>();

        result.evaluations += evaluated.len();

        Ok(evaluated)
    }

    fn create_solution(&self, data: Vec<f64>) -> VectorSolution {
        VectorSolution::new(data, self.function).with_delay(self.delay)
    }

    fn create_offspring(&self, parents: &[VectorSolution]) -> VectorSolution {
        let random = self.environment.random.as_ref();
        let parent = &parents[random.uniform_int(0, parents.len() as i32 - 1) as usize];

        let (mode, _) = self
            .operators
            .iter()
            .find(|(_, probability)| random.is_hit(*probability))
            .unwrap_or_else(|| &self.operators[random.uniform_int(0, self.operators.len() as i32 - 1) as usize]);

        self.create_solution(mode.mutate(parent.data.as_slice()))
    }

    fn select(&self, solutions: &mut Vec<VectorSolution>) {
        solutions.sort_by(|a, b| get_fitness(a).total_cmp(&get_fitness(b)));
        solutions.truncate(self.parents);
    }

    fn is_stopped(&self) -> bool {
        self.is_stopped.as_ref().is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn is_terminated(&self, timer: &Timer, generations: usize, best_fitness: f64) -> bool {
        self.is_stopped()
            || self.max_generations.is_some_and(|max| generations >= max)
            || self.max_time.is_some_and(|max| timer.elapsed() >= max)
            || self.target_fitness.is_some_and(|target| best_fitness <= target)
    }

    fn log(&self, message: &str) {
        (self.environment.logger)(message)
    }
}

fn get_fitness(solution: &VectorSolution) -> f64 {
    solution.fitness().unwrap_or(f64::MAX)
}

/// Creates multidimensional Rosenbrock function, also referred to as the Valley or Banana function.
/// The function is usually evaluated on the hypercube xi ∈ [-5, 10], for all i = 1, …, d, although
/// it may be restricted to the hypercube xi ∈ [-2.048, 2.048], for all i = 1, …, d.
pub fn create_rosenbrock_function() -> FitnessFn {
    Arc::new(|input| {
        input.windows(2).fold(0., |acc, pair| {
            let (x1, x2) = match pair {
                [x1, x2] => (*x1, *x2),
                _ => unreachable!(),
            };

            acc + 100. * (x2 - x1.powi(2)).powi(2) + (x1 - 1.).powi(2)
        })
    })
}

/// Creates a sphere function: a sum of squares with global minimum at the origin.
pub fn create_sphere_function() -> FitnessFn {
    Arc::new(|input| input.iter().map(|x| x * x).sum())
}

/// Creates Rastrigin function, a highly multimodal function with global minimum at the origin.
pub fn create_rastrigin_function() -> FitnessFn {
    Arc::new(|input| {
        let a = 10.;
        a * input.len() as f64
            + input.iter().map(|x| x * x - a * (2. * std::f64::consts::PI * x).cos()).sum::<f64>()
    })
}
