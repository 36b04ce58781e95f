use std::fmt;

/// Outcome of one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Tasks handed to the backend
    pub tasks: usize,
    /// Nodes whose dirty state was cleared
    pub nodes_cleared: usize,
    /// Iterations that reached `ClosedInBackend`
    pub iterations_closed: usize,
    /// The batch was bracketed by a streaming step
    pub stepped: bool,
}

impl FlushReport {
    /// Whether the flush had nothing to do
    pub fn is_noop(&self) -> bool {
        self.tasks == 0
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Flushed {} tasks, cleared {} nodes, closed {} iterations",
            self.tasks, self.nodes_cleared, self.iterations_closed
        )?;
        if self.stepped {
            write!(f, " (one streaming step)")?;
        }
        Ok(())
    }
}
