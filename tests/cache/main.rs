// Cache Tests
// Entries, the last-writer-wins store, and merge convergence
