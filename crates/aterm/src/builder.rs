#![forbid(unsafe_code)]

use std::fmt;

use maxterm_utilities::TermStoreError;
use maxterm_utilities::debug_trace;

use crate::ATerm;
use crate::Symbol;
use crate::Term;
use crate::storage::ThreadTermPool;

/// Constructs an [ATerm] from a given input of (inductive) type I without
/// using recursion, avoiding system stack overflows on deep inputs. See
/// [TermBuilder::evaluate] for details.
#[derive(Default)]
pub struct TermBuilder<I, C> {
    // The stack of intermediate terms.
    terms: Vec<Option<ATerm>>,
    configs: Vec<Config<I, C>>,
}

/// Applies the given function to every subterm of the given term.
///     function(subterm) returns:
///         None   , in which case subterm is kept and its arguments are
///                  recursed into.
///         Some(x), in which case subterm is replaced by x.
pub fn apply<F>(tp: &ThreadTermPool, t: &ATerm, function: &F) -> ATerm
where
    F: Fn(&ThreadTermPool, &ATerm) -> Option<ATerm>,
{
    let mut builder = TermBuilder::<ATerm, Symbol>::new();

    builder
        .evaluate(
            tp,
            t.clone(),
            |tp, args, t| match function(tp, &t) {
                Some(result) => Ok(Yield::Term(result)),
                None => {
                    for arg in t.arguments() {
                        args.push(arg.protect());
                    }

                    Ok(Yield::Construct(t.head_symbol().protect()))
                }
            },
            |tp, symbol, args| Ok(tp.create_term_iter(&symbol, args)),
        )
        .unwrap()
}

impl<I: fmt::Debug, C: fmt::Debug> TermBuilder<I, C> {
    pub fn new() -> TermBuilder<I, C> {
        TermBuilder {
            terms: vec![],
            configs: vec![],
        }
    }

    /// Constructs a term from a given input of (inductive) type I, without
    /// using the system stack, i.e. recursion.
    ///
    /// The `transformer` function is applied to every instance I. It can
    /// either generate more inputs through the argument stack together with
    /// an instance C used to construct the result term, or yield a result
    /// term directly.
    ///
    /// The `construct` function takes an instance C and the results for the
    /// arguments that were pushed when the transformer ran.
    ///
    /// # Example
    ///
    /// To transform a term with a function `f : ATerm -> Option<ATerm>`, `I`
    /// is ATerm since that is the input, and `C` is the Symbol from which the
    /// resulting term is constructed. The transformer returns Yield(x) when f
    /// returns some term, and otherwise Construct(head(input)) with the
    /// arguments of the input term pushed to the stack. The construct
    /// function builds the term from the symbol and the transformed
    /// arguments.
    pub fn evaluate<F, G>(
        &mut self,
        tp: &ThreadTermPool,
        input: I,
        transformer: F,
        construct: G,
    ) -> Result<ATerm, TermStoreError>
    where
        F: Fn(&ThreadTermPool, &mut ArgStack<I, C>, I) -> Result<Yield<C>, TermStoreError>,
        // This wants impl Iterator<Item = &ATerm>, which is not possible in
        // this position.
        G: Fn(&ThreadTermPool, C, std::iter::Flatten<std::slice::Iter<Option<ATerm>>>) -> Result<ATerm, TermStoreError>,
    {
        debug_trace!("Transforming {:?}", input);
        self.terms.push(None);
        self.configs.push(Config::Apply(input, 0));

        while let Some(config) = self.configs.pop() {
            match config {
                Config::Apply(input, result) => {
                    // Applies the transformer to this input, obtaining either
                    // a result term or a constructor and its arguments.
                    let top_of_stack = self.configs.len();
                    let mut args = ArgStack::new(&mut self.terms, &mut self.configs);

                    match transformer(tp, &mut args, input)? {
                        Yield::Construct(input) => {
                            // Runs after the argument transformations.
                            let arity = args.len();
                            self.configs.reserve(1);
                            self.configs
                                .insert(top_of_stack, Config::Construct(input, arity, result));
                        }
                        Yield::Term(term) => {
                            self.terms[result] = Some(term);
                        }
                    }
                }
                Config::Construct(input, arity, result) => {
                    let arguments = self.terms[self.terms.len() - arity..].iter().flatten();

                    self.terms[result] = Some(construct(tp, input, arguments)?);

                    self.terms.drain(self.terms.len() - arity..);
                }
            }

            debug_trace!("{:?}", self);
        }

        debug_assert!(self.terms.len() == 1, "Expect exactly one term on the result stack");

        Ok(self
            .terms
            .pop()
            .expect("There should be at least one result")
            .expect("The result should be Some"))
    }
}

enum Config<I, C> {
    Apply(I, usize),
    Construct(C, usize, usize),
}

/// The result of one transformer application.
pub enum Yield<C> {
    /// Yield this term as is.
    Term(ATerm),
    /// Yield construct(C, args...) with the transformer applied to every
    /// argument pushed to the argument stack.
    Construct(C),
}

/// A local argument stack on the builder's term stack.
pub struct ArgStack<'a, I, C> {
    terms: &'a mut Vec<Option<ATerm>>,
    configs: &'a mut Vec<Config<I, C>>,
    top_of_stack: usize,
}

impl<'a, I, C> ArgStack<'a, I, C> {
    fn new(terms: &'a mut Vec<Option<ATerm>>, configs: &'a mut Vec<Config<I, C>>) -> ArgStack<'a, I, C> {
        let top_of_stack = terms.len();
        ArgStack {
            terms,
            configs,
            top_of_stack,
        }
    }

    /// Returns the amount of arguments added.
    fn len(&self) -> usize {
        self.terms.len() - self.top_of_stack
    }

    /// Adds the input to the argument stack; its transformed result becomes
    /// one argument of the enclosing construct.
    pub fn push(&mut self, input: I) {
        self.configs.push(Config::Apply(input, self.terms.len()));
        self.terms.push(None);
    }
}

impl<I: fmt::Debug, C: fmt::Debug> fmt::Debug for TermBuilder<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Terms: [")?;
        for (i, term) in self.terms.iter().enumerate() {
            writeln!(f, "{i}\t{term:?}")?;
        }
        writeln!(f, "]")?;

        writeln!(f, "Configs: [")?;
        for config in &self.configs {
            writeln!(f, "\t{config:?}")?;
        }
        write!(f, "]")
    }
}

impl<I: fmt::Debug, C: fmt::Debug> fmt::Debug for Config<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Config::Apply(x, result) => write!(f, "Apply({x:?}, {result})"),
            Config::Construct(symbol, arity, result) => {
                write!(f, "Construct({symbol:?}, {arity}, {result})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use maxterm_utilities::test_logger;

    use crate::ATerm;
    use crate::Symbol;
    use crate::storage::THREAD_TERM_POOL;

    use super::*;

    #[test]
    fn test_apply_rewrites_constants() {
        test_logger();

        let f = Symbol::new("builder_f", 2);
        let g = Symbol::new("builder_g", 1);
        let a = ATerm::constant(&Symbol::new("builder_a", 0));
        let b = ATerm::constant(&Symbol::new("builder_b", 0));

        let ga = ATerm::with_args(&g, &[a.copy()]);
        let t = ATerm::with_args(&f, &[ga.copy(), a.copy()]);

        // Replace every occurrence of the constant a by b.
        let result = THREAD_TERM_POOL.with_borrow(|tp| {
            apply(tp, &t, &|_tp, subterm| {
                if *subterm == a { Some(b.clone()) } else { None }
            })
        });

        let gb = ATerm::with_args(&g, &[b.copy()]);
        let expected = ATerm::with_args(&f, &[gb.copy(), b.copy()]);
        assert_eq!(result, expected, "Both occurrences of a are replaced");
    }
}
