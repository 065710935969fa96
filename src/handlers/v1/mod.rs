pub mod testgrp;
