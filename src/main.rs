fn main() {
    rycc::compiler_main();
}
