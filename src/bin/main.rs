fn main() {
    paraminer::main();
}
